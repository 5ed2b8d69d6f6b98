//! decrypt-and-start: decrypt `decrypt:` environment variables, then exec
//!
//! Every environment variable whose value starts with `decrypt:` is
//! base64-decoded and decrypted through AWS KMS (directly, or as an AWS
//! Encryption SDK message). The plaintext replaces the value and the process
//! is replaced by the given command.

mod exec;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use decrypt_and_start::config::DEFAULT_WORKERS;
use decrypt_and_start::{
    env, Base64Alphabet, Config, DecryptOptions, Error, KmsClient, KmsSettings, WorkerPool,
};
use tracing::{error, info};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Decrypt encrypted environment variables, then exec a command
#[derive(Parser, Debug)]
#[command(name = "decrypt-and-start", version)]
#[command(about = "Decrypts `decrypt:` environment variables with AWS KMS, then execs COMMAND")]
struct Args {
    /// Number of concurrent decryption workers
    #[arg(short, long, env = "DECRYPT_AND_START_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// IAM role to assume before calling KMS
    #[arg(long, env = "DECRYPT_AND_START_ROLE_ARN")]
    role_arn: Option<String>,

    /// AWS region (discovered from the environment when omitted)
    #[arg(long, env = "DECRYPT_AND_START_REGION")]
    region: Option<String>,

    /// Base64 alphabet of encrypted values: standard or url-safe
    #[arg(long = "base64", env = "DECRYPT_AND_START_BASE64", default_value = "standard")]
    alphabet: Base64Alphabet,

    /// Verify envelope header authentication tags
    #[arg(long)]
    verify_header: bool,

    /// Command to exec once every value is decrypted, with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<OsString>,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            workers: self.workers,
            role_arn: self.role_arn.clone(),
            region: self.region.clone(),
            alphabet: self.alphabet,
            verify_header_auth: self.verify_header,
        }
    }
}

/// Decrypt every candidate variable and rewrite the environment
///
/// Variables are only rewritten once every value decrypted, so a failure
/// leaves the environment untouched.
fn decrypt_environment(config: &Config) -> Result<usize, Error> {
    config.validate()?;

    let jobs = env::candidates();
    let settings = KmsSettings {
        region: config.region.clone(),
        role_arn: config.role_arn.clone(),
        ..KmsSettings::default()
    };

    let pool = WorkerPool::new(config.workers, config.alphabet).with_options(DecryptOptions {
        verify_header_auth: config.verify_header_auth,
    });
    let vars = pool.run(|| KmsClient::connect(&settings), jobs)?;

    for var in &vars {
        env::apply(&var.name, &var.value)?;
    }
    Ok(vars.len())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = args.config();

    match decrypt_environment(&config) {
        Ok(count) => info!(count, workers = config.workers, "environment decrypted"),
        Err(err) => {
            match err.variable() {
                Some(name) => error!(variable = name, "{}", err),
                None => error!("{}", err),
            }
            return ExitCode::FAILURE;
        }
    }

    let Some((program, rest)) = args.command.split_first() else {
        return ExitCode::SUCCESS;
    };

    let err = exec::replace_process(program, rest);
    error!(command = ?program, "failed to start command: {}", err);
    ExitCode::FAILURE
}
