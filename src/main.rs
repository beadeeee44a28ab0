//! Command-line surface for Caixa POS.
//!
//! Each subcommand signs the operator in, acts on their caixa, and prints
//! the outcome. The process is short-lived; durable state lives in the
//! SQLite database under the data directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use caixa_pos::auth::{self, AuthState, Operator};
use caixa_pos::caixa::{self, NovaSangria, NovoLancamento};
use caixa_pos::db::{self, DbState};
use caixa_pos::{init_logging, ledger, print};

#[derive(Parser)]
#[command(name = "caixa-pos", version, about = "Cash-drawer management for bus-fare collection")]
struct Cli {
    /// Data directory (database, logs, reports, spool).
    #[arg(long, env = "CAIXA_POS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new operator account.
    Register {
        #[arg(long)]
        nome: String,
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
    },
    /// Open a caixa for the operator.
    Abrir {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
    },
    /// Show whether the operator has an open caixa.
    Status {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
    },
    /// Record a manual fare entry against the open caixa.
    Lancamento {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
        #[arg(long)]
        tipo_validador: String,
        /// Vehicle prefix, digits only, max 3 characters.
        #[arg(long)]
        prefixo: String,
        #[arg(long)]
        qtd_bordos: i64,
        #[arg(long)]
        motorista: String,
        /// Caixa date override (dd/mm/yyyy); defaults to the session date.
        #[arg(long)]
        data_caixa: Option<String>,
        /// Idempotency key; a replay returns the already-recorded entry.
        #[arg(long)]
        chave: Option<String>,
    },
    /// Record a cash withdrawal against the open caixa.
    Sangria {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
        #[arg(long)]
        valor: f64,
        #[arg(long)]
        motivo: String,
        #[arg(long)]
        chave: Option<String>,
    },
    /// Print the ledger summary of the open caixa.
    Resumo {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
        /// Emit the full ledger as JSON instead of the text summary.
        #[arg(long)]
        json: bool,
    },
    /// Close the open caixa and write the closing PDF report.
    Fechar {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
        /// Report output directory; defaults to `{data_dir}/relatorios`.
        #[arg(long)]
        saida: Option<PathBuf>,
    },
    /// Finish a close interrupted before the report was written.
    RetomarFechamento {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha: String,
        #[arg(long)]
        saida: Option<PathBuf>,
    },
    /// Flush pending thermal receipts to the spool directory.
    ImprimirPendentes {
        /// Spool directory; defaults to `{data_dir}/spool`.
        #[arg(long)]
        spool: Option<PathBuf>,
    },
    /// Change the operator's password.
    Senha {
        #[arg(long)]
        matricula: String,
        #[arg(long)]
        senha_atual: String,
        #[arg(long)]
        senha_nova: String,
    },
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".caixa-pos")
}

fn sign_in(db: &DbState, matricula: &str, senha: &str) -> Result<Operator, String> {
    let auth_state = AuthState::new();
    auth::login(db, &auth_state, matricula, senha)
}

/// Resolve the receipt spool directory: explicit flag, else the configured
/// `printer/spool_dir` setting (relative paths resolve under the data dir).
fn resolve_spool_dir(db: &DbState, data_dir: &Path, flag: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    let configured = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::spool_dir(&conn)
    };
    let configured = PathBuf::from(configured);
    Ok(if configured.is_absolute() {
        configured
    } else {
        data_dir.join(configured)
    })
}

/// The operator's open caixa, or a uniform error if there is none.
fn require_open_caixa(db: &DbState, operator: &Operator) -> Result<caixa::Caixa, String> {
    caixa::get_open_caixa(db, operator)?
        .ok_or_else(|| format!("Operator {} has no open caixa", operator.matricula))
}

fn run(cli: Cli, data_dir: &Path) -> Result<(), String> {
    let db = db::init(data_dir)?;

    match cli.command {
        Command::Register { nome, matricula, senha } => {
            let op = auth::register(&db, &nome, &matricula, &senha)?;
            println!("Operator {} registered (login {})", op.matricula, op.login);
            if op.is_admin {
                println!("Administrator privileges granted");
            }
        }
        Command::Abrir { matricula, senha } => {
            let op = sign_in(&db, &matricula, &senha)?;
            let caixa = caixa::open_caixa(&db, &op)?;
            println!("Caixa {} opened for {}", caixa.id, caixa.data_caixa);
        }
        Command::Status { matricula, senha } => {
            let op = sign_in(&db, &matricula, &senha)?;
            match caixa::get_open_caixa(&db, &op)? {
                Some(c) => println!(
                    "Caixa {} ({}, opened {})",
                    c.id,
                    c.status.as_str(),
                    c.opened_at
                ),
                None => println!("No open caixa"),
            }
        }
        Command::Lancamento {
            matricula,
            senha,
            tipo_validador,
            prefixo,
            qtd_bordos,
            motorista,
            data_caixa,
            chave,
        } => {
            let op = sign_in(&db, &matricula, &senha)?;
            let c = require_open_caixa(&db, &op)?;
            let novo = NovoLancamento {
                tipo_validador,
                prefixo,
                qtd_bordos,
                matricula_motorista: motorista,
                data_caixa,
                idempotency_key: chave,
            };
            let lanc = caixa::record_lancamento(&db, &op, &c.id, &novo)?;
            println!(
                "Lancamento {} recorded: {} bordos, {}",
                lanc.id,
                lanc.qtd_bordos,
                ledger::format_brl(lanc.valor)
            );
            let spool = resolve_spool_dir(&db, data_dir, None)?;
            let written = print::flush_spool(&db, &spool)?;
            for path in written {
                println!("Receipt spooled to {}", path.display());
            }
        }
        Command::Sangria { matricula, senha, valor, motivo, chave } => {
            let op = sign_in(&db, &matricula, &senha)?;
            let c = require_open_caixa(&db, &op)?;
            let nova = NovaSangria {
                valor,
                motivo,
                idempotency_key: chave,
            };
            let sangria = caixa::record_sangria(&db, &op, &c.id, &nova)?;
            println!(
                "Sangria {} recorded: {} ({})",
                sangria.id,
                ledger::format_brl(sangria.valor),
                sangria.motivo
            );
        }
        Command::Resumo { matricula, senha, json } => {
            let op = sign_in(&db, &matricula, &senha)?;
            let c = require_open_caixa(&db, &op)?;
            let caixa_ledger = ledger::load_ledger(&db, &c.id)?;
            if json {
                let out = serde_json::to_string_pretty(&caixa_ledger)
                    .map_err(|e| format!("serialize ledger: {e}"))?;
                println!("{out}");
            } else {
                print!("{}", ledger::render_summary(&caixa_ledger));
            }
        }
        Command::Fechar { matricula, senha, saida } => {
            let op = sign_in(&db, &matricula, &senha)?;
            let c = require_open_caixa(&db, &op)?;
            let out_dir = saida.unwrap_or_else(|| data_dir.join("relatorios"));
            let (closed, pdf_path) = caixa::close_caixa(&db, &op, &c.id, &out_dir)?;
            println!(
                "Caixa {} closed at {}",
                closed.id,
                closed.closed_at.as_deref().unwrap_or("-")
            );
            println!("Report: {}", pdf_path.display());
        }
        Command::RetomarFechamento { matricula, senha, saida } => {
            let op = sign_in(&db, &matricula, &senha)?;
            let out_dir = saida.unwrap_or_else(|| data_dir.join("relatorios"));
            match caixa::resume_close(&db, &op, &out_dir)? {
                Some((closed, pdf_path)) => {
                    println!("Caixa {} closed", closed.id);
                    println!("Report: {}", pdf_path.display());
                }
                None => println!("No interrupted close to resume"),
            }
        }
        Command::ImprimirPendentes { spool } => {
            let spool_dir = resolve_spool_dir(&db, data_dir, spool)?;
            let written = print::flush_spool(&db, &spool_dir)?;
            if written.is_empty() {
                println!("No pending receipts");
            }
            for path in written {
                println!("Receipt spooled to {}", path.display());
            }
        }
        Command::Senha { matricula, senha_atual, senha_nova } => {
            auth::change_password(&db, &matricula, &senha_atual, &senha_nova)?;
            println!("Password changed for {matricula}");
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    init_logging(&data_dir);

    match run(cli, &data_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
