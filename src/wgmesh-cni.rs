//! Entrypoint for the `wgmesh-cni` binary.
//!
//! This binary is a chained CNI plugin. The runtime passes the command through the
//! environment and the network configuration on stdin. The result is printed on stdout,
//! so all logging goes to stderr.

use std::io::{Read, Write};

use common::logging::{enable_logger, Target};
use wgmesh::cni::{
    self,
    config::probe_version,
    types::{ErrorResult, DEFAULT_VERSION},
    CmdArgs,
};

mod common;

async fn run(stdin: &[u8]) -> Result<String, cni::Error> {
    let args = CmdArgs::from_env()?;
    cni::execute(&args, stdin).await
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    // Initialize logging
    let verbose = std::env::var_os("WGMESH_VERBOSE").is_some();
    if let Err(error) = enable_logger(verbose, Target::Stderr) {
        eprintln!("Failed to initialize logging: {error}");
    }

    let mut stdin = Vec::new();
    let outcome = match std::io::stdin().read_to_end(&mut stdin) {
        Ok(_) => run(&stdin).await,
        Err(error) => Err(error.into()),
    };

    let mut stdout = std::io::stdout().lock();
    match outcome {
        Ok(output) => {
            if !output.is_empty() {
                if let Err(error) = writeln!(stdout, "{output}") {
                    log::error!("Failed to write result: {}", error);
                    std::process::exit(1);
                }
            }
        }
        Err(error) => {
            log::error!("{}", error);
            let document = ErrorResult {
                cni_version: probe_version(&stdin).unwrap_or_else(|| DEFAULT_VERSION.to_owned()),
                code: error.code(),
                msg: error.to_string(),
                details: std::error::Error::source(&error)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            };
            match serde_json::to_string(&document) {
                Ok(document) => {
                    let _ = writeln!(stdout, "{document}");
                }
                Err(encode) => log::error!("Failed to encode error result: {}", encode),
            }
            std::process::exit(1);
        }
    }
}
