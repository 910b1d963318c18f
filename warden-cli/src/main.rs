//! Operator CLI: validate policies, dry-run decisions, inspect
//! checkpoints and pre-flight adapter configurations.
//!
//! Exit codes: 0 success, 1 generic error, 2 usage error, 3 policy
//! denial, 4 infrastructure unavailable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use warden::prelude::*;

const EXIT_OK: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_DENIED: u8 = 3;
const EXIT_INFRA: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Self-hosted runtime for autonomous agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate and inspect policy files.
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Inspect persisted checkpoints.
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    /// Pre-flight adapter configurations.
    Adapter {
        #[command(subcommand)]
        command: AdapterCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Parse a policy file, failing on malformed configuration.
    Lint { file: PathBuf },
    /// Evaluate one request against a policy file.
    Check {
        file: PathBuf,
        /// Request domain: file, network, shell or secret.
        #[arg(long)]
        domain: String,
        /// Path, host, command line or secret name to test.
        #[arg(long)]
        subject: String,
        /// File operation (read, write, delete, list).
        #[arg(long, default_value = "read")]
        operation: String,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointCommand {
    /// List agent ids with a stored checkpoint.
    List {
        #[arg(long)]
        store: PathBuf,
    },
    /// Print one agent's checkpoint as JSON.
    Show {
        #[arg(long)]
        store: PathBuf,
        agent: String,
    },
}

#[derive(Subcommand, Debug)]
enum AdapterCommand {
    /// Print the capability set an adapter configuration requires.
    Caps { file: PathBuf },
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warn".parse().expect("valid directive")),
        )
        .json()
        .try_init();

    let cli = Cli::parse();
    ExitCode::from(run(cli))
}

fn run(cli: Cli) -> u8 {
    match cli.command {
        Command::Policy { command } => match command {
            PolicyCommand::Lint { file } => match load_policy_file(&file) {
                Ok(set) => {
                    let rules = set.file_rules().len()
                        + set.network_rules().len()
                        + set.shell_rules().len()
                        + set.secret_rules().len();
                    println!("ok: {rules} rules across four domains");
                    EXIT_OK
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    EXIT_ERROR
                }
            },
            PolicyCommand::Check {
                file,
                domain,
                subject,
                operation,
            } => policy_check(&file, &domain, &subject, &operation),
        },
        Command::Checkpoint { command } => match command {
            CheckpointCommand::List { store } => match open_store(&store) {
                Ok(store) => match store.list() {
                    Ok(ids) => {
                        for id in ids {
                            println!("{id}");
                        }
                        EXIT_OK
                    }
                    Err(error) => {
                        eprintln!("error: {error}");
                        EXIT_INFRA
                    }
                },
                Err(code) => code,
            },
            CheckpointCommand::Show { store, agent } => {
                let Ok(agent_id) = AgentId::parse(&agent) else {
                    eprintln!("error: '{agent}' is not a valid agent id");
                    return EXIT_USAGE;
                };
                match open_store(&store) {
                    Ok(store) => match store.load(&agent_id) {
                        Ok(checkpoint) => {
                            match serde_json::to_string_pretty(&checkpoint) {
                                Ok(json) => {
                                    println!("{json}");
                                    EXIT_OK
                                }
                                Err(error) => {
                                    eprintln!("error: {error}");
                                    EXIT_ERROR
                                }
                            }
                        }
                        Err(error) => {
                            eprintln!("error: {error}");
                            EXIT_INFRA
                        }
                    },
                    Err(code) => code,
                }
            }
        },
        Command::Adapter { command } => match command {
            AdapterCommand::Caps { file } => match load_adapter_config(&file) {
                Ok(config) => match adapter_for(&config).and_then(|mut adapter| {
                    adapter.load(&config)?;
                    Ok(adapter.required_capabilities().clone())
                }) {
                    Ok(capabilities) => {
                        for capability in capabilities {
                            println!("{capability}");
                        }
                        EXIT_OK
                    }
                    Err(error) => {
                        eprintln!("error: {error}");
                        EXIT_ERROR
                    }
                },
                Err(error) => {
                    eprintln!("error: {error}");
                    EXIT_ERROR
                }
            },
        },
    }
}

fn open_store(path: &PathBuf) -> Result<Box<dyn CheckpointStore>, u8> {
    let store: Box<dyn CheckpointStore> = if path.extension().is_some_and(|e| e == "db") {
        match SqliteStore::open(path) {
            Ok(store) => Box::new(store),
            Err(error) => {
                eprintln!("error: {error}");
                return Err(EXIT_INFRA);
            }
        }
    } else {
        match FileStore::open(path) {
            Ok(store) => Box::new(store),
            Err(error) => {
                eprintln!("error: {error}");
                return Err(EXIT_INFRA);
            }
        }
    };
    Ok(store)
}

fn policy_check(file: &PathBuf, domain: &str, subject: &str, operation: &str) -> u8 {
    let set = match load_policy_file(file) {
        Ok(set) => set,
        Err(error) => {
            eprintln!("error: {error}");
            return EXIT_ERROR;
        }
    };
    let agent_id = AgentId::new_unchecked("cli");
    let request = match domain {
        "file" => {
            let operation = match operation {
                "read" => FileOperation::Read,
                "write" => FileOperation::Write,
                "delete" => FileOperation::Delete,
                "list" => FileOperation::List,
                other => {
                    eprintln!("error: unknown file operation '{other}'");
                    return EXIT_USAGE;
                }
            };
            PolicyRequest::File {
                path: subject.to_string(),
                operation,
                agent_id,
            }
        }
        "network" => PolicyRequest::Network {
            host: subject.to_string(),
            port: None,
            scheme: None,
            agent_id,
        },
        "shell" => PolicyRequest::Shell {
            command: subject.to_string(),
            agent_id,
        },
        "secret" => PolicyRequest::Secret {
            name: subject.to_string(),
            agent_id,
        },
        other => {
            eprintln!("error: unknown domain '{other}'");
            return EXIT_USAGE;
        }
    };

    let outcome = warden::policy::engine::evaluate(&set, &request);
    let rule = outcome
        .matched_rule
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{} rule={rule} reason={}", outcome.decision, outcome.reason);
    match outcome.decision {
        PolicyDecision::Allow => EXIT_OK,
        PolicyDecision::Block | PolicyDecision::Approve => EXIT_DENIED,
    }
}
