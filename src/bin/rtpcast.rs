//! `rtpcast`: run the stock RTP sender or receiver, or any launch line.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rtpcast::EngineContext;
use rtpcast::pipeline::{Controller, PipelineGraph, Termination};
use rtpcast::presets::{ReceiverConfig, SenderConfig, build_receiver, build_sender};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rtpcast")]
#[command(version, about = "Send and receive H.264 video over RTP")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a test pattern to a UDP destination
    Send {
        /// Destination host [default: 127.0.0.1]
        #[arg(long)]
        host: Option<String>,

        /// Destination port [default: 5004]
        #[arg(short, long)]
        port: Option<u16>,

        /// Encoder bitrate in kbit/s [default: 500]
        #[arg(long)]
        bitrate: Option<u32>,

        /// Encoder speed preset [default: superfast]
        #[arg(long)]
        speed_preset: Option<String>,

        /// Encoder tuning [default: zerolatency]
        #[arg(long)]
        tune: Option<String>,

        /// Test pattern index [default: 1]
        #[arg(long)]
        pattern: Option<u32>,

        /// Frame rate as n/d [default: 20/1]
        #[arg(long, value_parser = parse_fraction)]
        framerate: Option<(u32, u32)>,

        /// Stop after this many frames
        #[arg(short, long)]
        num_buffers: Option<u64>,
    },

    /// Receive, decode and display an RTP stream
    Receive {
        /// Local port to listen on [default: 5004]
        #[arg(short, long)]
        port: Option<u16>,

        /// Caps of the incoming stream
        #[arg(long)]
        caps: Option<String>,

        /// Jitter buffer latency in milliseconds [default: 200]
        #[arg(long)]
        latency: Option<u64>,

        /// Renderer stage type [default: autovideosink]
        #[arg(long)]
        sink: Option<String>,
    },

    /// Run a pipeline described by a launch line
    Launch {
        /// Launch description, e.g. `videotestsrc ! fakesink`
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
    },
}

fn parse_fraction(s: &str) -> std::result::Result<(u32, u32), String> {
    let (num, den) = s.split_once('/').unwrap_or((s, "1"));
    let num = num.trim().parse().map_err(|_| format!("bad numerator in {s:?}"))?;
    let den: u32 = den.trim().parse().map_err(|_| format!("bad denominator in {s:?}"))?;
    if den == 0 {
        return Err("denominator must not be zero".to_string());
    }
    Ok((num, den))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rtpcast=debug" } else { "rtpcast=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build(engine: &EngineContext, command: Commands) -> Result<PipelineGraph> {
    let graph = match command {
        Commands::Send {
            host,
            port,
            bitrate,
            speed_preset,
            tune,
            pattern,
            framerate,
            num_buffers,
        } => {
            let defaults = SenderConfig::default();
            let config = SenderConfig {
                host: host.unwrap_or(defaults.host),
                port: port.unwrap_or(defaults.port),
                bitrate: bitrate.unwrap_or(defaults.bitrate),
                speed_preset: speed_preset.unwrap_or(defaults.speed_preset),
                tune: tune.unwrap_or(defaults.tune),
                pattern: pattern.unwrap_or(defaults.pattern),
                framerate: framerate.unwrap_or(defaults.framerate),
                num_buffers,
            };
            build_sender(engine, &config).context("failed to build sender pipeline")?
        }
        Commands::Receive {
            port,
            caps,
            latency,
            sink,
        } => {
            let defaults = ReceiverConfig::default();
            let config = ReceiverConfig {
                port: port.unwrap_or(defaults.port),
                caps: caps.unwrap_or(defaults.caps),
                latency_ms: latency.unwrap_or(defaults.latency_ms),
                sink: sink.unwrap_or(defaults.sink),
            };
            build_receiver(engine, &config).context("failed to build receiver pipeline")?
        }
        Commands::Launch { description } => engine
            .parse_launch(&description.join(" "))
            .context("failed to parse launch description")?,
    };
    Ok(graph)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine = EngineContext::new();
    let graph = build(&engine, cli.command)?;
    let mut controller = Controller::new(graph);

    if let Err(e) = controller.set_playing() {
        bail!("unable to set the pipeline to the playing state: {e}");
    }
    println!("Pipeline is PLAYING ...");

    let outcome = tokio::select! {
        outcome = controller.wait_terminal_async() => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    controller.teardown();

    match outcome {
        Some(outcome @ Termination::EndOfStream) => {
            println!("{outcome}");
            println!("Ok");
            Ok(ExitCode::SUCCESS)
        }
        Some(outcome) => {
            eprintln!("{outcome}");
            Ok(ExitCode::FAILURE)
        }
        None => {
            println!("Interrupted");
            println!("Ok");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fraction() {
        assert_eq!(parse_fraction("20/1"), Ok((20, 1)));
        assert_eq!(parse_fraction("25"), Ok((25, 1)));
        assert!(parse_fraction("30/0").is_err());
        assert!(parse_fraction("x/1").is_err());
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from(["rtpcast", "-v", "send", "--port", "6000", "--framerate", "10/1"])
            .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Send { port: Some(6000), framerate: Some((10, 1)), .. }
        ));
    }

    #[test]
    fn test_cli_launch_joins_words() {
        let cli = Cli::try_parse_from(["rtpcast", "launch", "videotestsrc", "!", "fakesink"]).unwrap();
        let Commands::Launch { description } = cli.command else {
            panic!("expected launch");
        };
        assert_eq!(description.join(" "), "videotestsrc ! fakesink");
    }
}
