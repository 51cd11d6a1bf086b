use anyhow::Context;
use clap::{Parser, Subcommand};
use gateway::parse_payload;
use hl7::{mllp, ElementTree, Message};
use rxbridge_certificates::MachineCertificate;
use rxbridge_core::{
    CoreConfig, Dialect, Engine, GatewayLink, MemoryGuidStore, TransformOptions, Transformer,
    UuidAllocator, LOG_TARGETS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rxbridge")]
#[command(about = "HL7 pharmacy interface engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the element tree of an HL7 message file
    Parse {
        /// Message file (framed or unframed)
        file: PathBuf,
    },
    /// Print the gateway records a message would produce, without sending them
    Translate {
        /// Message file (framed or unframed)
        file: PathBuf,
        /// Sending-application dialect (detected from MSH.3/MSH.4 if omitted)
        #[arg(long)]
        dialect: Option<String>,
    },
    /// Send a message through the configured gateway and print the reply
    Send {
        /// Message file (framed or unframed)
        file: PathBuf,
    },
    /// Write a self-signed machine certificate and key
    Cert {
        /// Host name placed in the certificate
        host: String,
        /// Directory for cert.pem and key.pem
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(log_filter()?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Parse { file }) => {
            let text = read_message(&file)?;
            let tree = ElementTree::parse(&text).context("could not parse message")?;
            for segment in tree.segments() {
                for element in segment.elements() {
                    if element.value.is_empty() {
                        continue;
                    }
                    match element.repetition {
                        0 => println!("{} = {}", element.path, element.value),
                        n => println!("{}[{}] = {}", element.path, n, element.value),
                    }
                }
            }
        }
        Some(Commands::Translate { file, dialect }) => {
            let text = read_message(&file)?;
            let message = Message::parse(&text).context("could not assemble message")?;
            let dialect = match dialect {
                Some(name) => Dialect::lookup(&name)
                    .with_context(|| format!("unknown dialect '{name}'"))?,
                None => Dialect::detect(&message.header),
            };
            let config = CoreConfig::from_env()?;
            let transformer = Transformer::new(
                TransformOptions::from(&config),
                Arc::new(UuidAllocator),
                Arc::new(MemoryGuidStore::new()),
            );

            println!("dialect: {dialect}");
            for mut record in transformer.transform(&message, dialect)? {
                let heading = format!("{} ({})", record.kind(), record.operation().code());
                let payload = record.to_payload()?;
                println!("\n{heading}");
                for (tag, value) in parse_payload(&payload)? {
                    println!("  {tag} = {value}");
                }
            }
        }
        Some(Commands::Send { file }) => {
            let text = read_message(&file)?;
            let config = CoreConfig::from_env()?;
            let link = GatewayLink::new(&config)?;
            let engine = Engine::new(Arc::new(config), Arc::new(link));
            let reply = engine.handle(&text);
            println!("{}", reply.readable);
            if !reply.is_ack() {
                anyhow::bail!("message refused with {}", reply.code);
            }
        }
        Some(Commands::Cert { host, out_dir }) => {
            let certificate = MachineCertificate::self_signed(&host)?;
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("could not create {}", out_dir.display()))?;
            let cert_path = out_dir.join("cert.pem");
            let key_path = out_dir.join("key.pem");
            std::fs::write(&cert_path, &certificate.cert_pem)?;
            std::fs::write(&key_path, &certificate.key_pem)?;
            println!("Wrote {} and {}", cert_path.display(), key_path.display());
        }
        None => {
            println!("Use 'rxbridge --help' for commands");
        }
    }

    Ok(())
}

/// Reads a message file, removing MLLP framing if present.
fn read_message(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    Ok(String::from_utf8_lossy(mllp::unframe(&bytes)).into_owned())
}

/// `RUST_LOG` plus `warn` for every workspace crate.
fn log_filter() -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{target}=warn").parse()?);
    }
    Ok(filter)
}
