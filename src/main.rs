use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::exit,
};

use structopt::StructOpt;

use seqdb::{Database, DbError, ErrorKind, ExecOutput};

#[derive(StructOpt)]
#[structopt(
    name = "seqdb",
    about = "A single-node, file-backed, typed numeric database"
)]
enum Opt {
    /// Create (or open) a database directory
    Create { dir: PathBuf },

    /// Execute a single statement
    Exec { dir: PathBuf, stmt: String },

    /// Run statements from stdin, one per line
    Shell { dir: PathBuf },

    /// Force a checkpoint
    Checkpoint { dir: PathBuf },

    /// Dataset conveniences over the statement surface
    Ds(DsOpt),
}

#[derive(StructOpt)]
enum DsOpt {
    /// Create a dataset: ds create <db> <name> <dtype>
    Create {
        dir: PathBuf,
        name: String,
        dtype: String,
    },

    /// Read a range: ds read <db> <name> <start> <end>
    Read {
        dir: PathBuf,
        name: String,
        start: u64,
        end: u64,
    },

    /// Overwrite a range: ds write <db> <name> <start> <end> <expr>
    Write {
        dir: PathBuf,
        name: String,
        start: u64,
        end: u64,
        expr: String,
    },

    /// Append elements at the tail: ds append <db> <name> <count> <expr>
    Append {
        dir: PathBuf,
        name: String,
        count: u64,
        expr: String,
    },
}

fn exit_code(e: &DbError) -> i32 {
    match e.kind() {
        ErrorKind::Io => 2,
        ErrorKind::Corrupt => 3,
        ErrorKind::Nomem => 4,
        ErrorKind::Syntax => 5,
        ErrorKind::Arith => 6,
        ErrorKind::DoesntExist => 7,
        ErrorKind::AlreadyExists => 8,
        ErrorKind::TypeDeser => 9,
        ErrorKind::PagerFull => 10,
        ErrorKind::PageStackOverflow => 11,
        ErrorKind::DuplicateCommit => 12,
        ErrorKind::InvalidArgument => 13,
    }
}

fn print_output(out: ExecOutput) {
    if let ExecOutput::Bytes(bytes) = out {
        println!("{}", hex::encode(&bytes));
    }
}

fn run() -> Result<(), DbError> {
    match Opt::from_args() {
        Opt::Create { dir } => {
            let db = Database::open(&dir)?;
            db.close()?;
            println!("created {}", dir.display());
        }
        Opt::Exec { dir, stmt } => {
            let db = Database::open(&dir)?;
            let out = db.execute(&stmt)?;
            db.close()?;
            print_output(out);
        }
        Opt::Shell { dir } => {
            let db = Database::open(&dir)?;
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line.map_err(DbError::from)?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match db.execute(line) {
                    Ok(out) => print_output(out),
                    Err(e) => {
                        // A failed statement leaves the database
                        // usable; report and keep going.
                        eprintln!("error: {}", e);
                    }
                }
                io::stdout().flush().ok();
            }
            db.close()?;
        }
        Opt::Checkpoint { dir } => {
            let db = Database::open(&dir)?;
            db.checkpoint()?;
            db.close()?;
        }
        Opt::Ds(ds) => run_ds(ds)?,
    }
    Ok(())
}

fn run_ds(ds: DsOpt) -> Result<(), DbError> {
    match ds {
        DsOpt::Create { dir, name, dtype } => {
            let db = Database::open(&dir)?;
            db.execute(&format!("create {} {};", name, dtype))?;
            db.close()?;
        }
        DsOpt::Read {
            dir,
            name,
            start,
            end,
        } => {
            let db = Database::open(&dir)?;
            let out = db.execute(&format!("read {}[{}..{}];", name, start, end))?;
            db.close()?;
            print_output(out);
        }
        DsOpt::Write {
            dir,
            name,
            start,
            end,
            expr,
        } => {
            let db = Database::open(&dir)?;
            db.execute(&format!("write {}[{}..{}] = {};", name, start, end, expr))?;
            db.close()?;
        }
        DsOpt::Append {
            dir,
            name,
            count,
            expr,
        } => {
            let db = Database::open(&dir)?;
            let at = db.var_len(&name)?;
            db.execute(&format!(
                "insert {}[{}..{}] = {};",
                name,
                at,
                at + count,
                expr
            ))?;
            db.close()?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("error: {}", e);
        exit(exit_code(&e));
    }
}
