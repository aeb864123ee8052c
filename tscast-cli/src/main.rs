//! tscast command-line interface.
//!
//! `tscast play {file ip port}...` casts one or more TS files and exits
//! when every source has been fully sent; `tscast service` runs the
//! long-lived REST-controlled daemon.

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use tracing::error;

use tscast::{Caster, MuxerConfig};

const LICENSE_TEXT: &str = "\
tscast - real-time MPEG-2 transport stream sender

Licensed under the Apache License, Version 2.0 (the \"License\");
you may not use this software except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an \"AS IS\" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "tscast")]
#[command(version)]
#[command(about = "Real-time MPEG-2 TS sender over UDP (SMPTE 2022-2)")]
#[command(long_about = "tscast reads CBR MPEG-2 transport stream files and sends \n\
    them to UDP endpoints at their intrinsic PCR-derived bitrate.\n\n\
    EXAMPLES:\n    \
    tscast play movie.ts 127.0.0.1 50000\n    \
    tscast play a.ts 10.0.0.2 50000 b.ts 10.0.0.2 50001\n    \
    tscast service --port 8080\n    \
    tscast -v 5 play movie.ts 239.1.1.1 1234")]
struct Args {
    /// Verbosity level (0 = quiet, 1-2 = errors, 3 = warnings, 4 = info,
    /// 5 = debug, 6 = trace)
    #[arg(short, long, default_value_t = 4, global = true)]
    verbose: u8,

    /// Print the license and exit
    #[arg(short, long)]
    license: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cast files one-shot: play {file ip port}...
    Play {
        /// Stream triplets: {file} {target_ip} {target_port}, repeated
        #[arg(required = true)]
        streams: Vec<String>,
    },
    /// Run as a REST-controlled service
    Service {
        /// HTTP listening port
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

/// One parsed play-mode stream declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamSpec {
    source: String,
    ip: IpAddr,
    port: u16,
}

/// Parses play-mode triplets. Incomplete or malformed declarations are
/// reported and skipped.
fn parse_play_args(args: &[String]) -> Vec<StreamSpec> {
    let mut specs = Vec::new();

    for chunk in args.chunks(3) {
        if chunk.len() < 3 {
            eprintln!("incomplete stream declaration: {}", chunk.join(" "));
            continue;
        }

        let ip: IpAddr = match chunk[1].parse() {
            Ok(ip) => ip,
            Err(_) => {
                eprintln!("invalid target ip: {}", chunk[1]);
                continue;
            }
        };

        let port: u16 = match chunk[2].parse() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("invalid target port: {}", chunk[2]);
                continue;
            }
        };

        specs.push(StreamSpec {
            source: chunk[0].clone(),
            ip,
            port,
        });
    }

    specs
}

/// Maps the numeric verbosity flag onto a tracing filter directive.
fn verbosity_filter(level: u8) -> Option<&'static str> {
    match level {
        0 => Some("off"),
        1 | 2 => Some("error"),
        3 => Some("warn"),
        4 => Some("info"),
        5 => Some("debug"),
        6 => Some("trace"),
        _ => None,
    }
}

fn run_play(streams: Vec<String>) -> ExitCode {
    let specs = parse_play_args(&streams);
    if specs.is_empty() {
        eprintln!("no valid stream declarations");
        return ExitCode::FAILURE;
    }

    let caster = match Caster::new(MuxerConfig::default()) {
        Ok(caster) => caster,
        Err(e) => {
            error!(error = %e, "failed to start engine");
            return ExitCode::FAILURE;
        }
    };

    let mut created = 0;
    for spec in specs {
        match caster.create_stream(&spec.source, spec.ip, spec.port) {
            Ok(_) => created += 1,
            Err(e) => error!(source = %spec.source, error = %e, "stream rejected"),
        }
    }

    if created == 0 {
        return ExitCode::FAILURE;
    }

    caster.run_play();
    ExitCode::SUCCESS
}

fn run_service(port: u16) -> ExitCode {
    let caster = match Caster::new(MuxerConfig::default()) {
        Ok(caster) => Arc::new(caster),
        Err(e) => {
            error!(error = %e, "failed to start engine");
            return ExitCode::FAILURE;
        }
    };

    // Maintenance loop reaping finished streams.
    {
        let caster = Arc::clone(&caster);
        thread::spawn(move || caster.run_service());
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(tscast_server::serve(caster, port)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "service failed");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let Some(filter) = verbosity_filter(args.verbose) else {
        eprintln!("invalid verbose level: {}", args.verbose);
        return ExitCode::FAILURE;
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if args.license {
        println!("{LICENSE_TEXT}");
        return ExitCode::SUCCESS;
    }

    match args.command {
        Some(Command::Play { streams }) => run_play(streams),
        Some(Command::Service { port }) => run_service(port),
        None => {
            eprintln!("no command given; see tscast --help");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_single_triplet() {
        let specs = parse_play_args(&strings(&["a.ts", "127.0.0.1", "50000"]));
        assert_eq!(
            specs,
            vec![StreamSpec {
                source: "a.ts".into(),
                ip: "127.0.0.1".parse().unwrap(),
                port: 50000,
            }]
        );
    }

    #[test]
    fn test_parse_multiple_triplets() {
        let specs = parse_play_args(&strings(&[
            "a.ts", "127.0.0.1", "50000", "b.ts", "10.0.0.1", "50001",
        ]));
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].source, "b.ts");
        assert_eq!(specs[1].port, 50001);
    }

    #[test]
    fn test_incomplete_triplet_skipped() {
        let specs = parse_play_args(&strings(&["a.ts", "127.0.0.1", "50000", "b.ts"]));
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn test_bad_ip_and_port_skipped() {
        let specs = parse_play_args(&strings(&[
            "a.ts", "nowhere", "50000", "b.ts", "127.0.0.1", "99999",
        ]));
        assert!(specs.is_empty());
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(verbosity_filter(0), Some("off"));
        assert_eq!(verbosity_filter(4), Some("info"));
        assert_eq!(verbosity_filter(6), Some("trace"));
        assert_eq!(verbosity_filter(7), None);
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
