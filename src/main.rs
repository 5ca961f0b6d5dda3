use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use monkeytalk::agent::{Agent, AgentManager, DEFAULT_AGENT};
use monkeytalk::recorder::{start_record_server, RecordSession};
use monkeytalk::report;
use monkeytalk::runner::{self, AbortHandle};
use monkeytalk::utils::{PlaybackConfig, ServerConfig};

#[derive(Parser)]
#[command(name = "monkeytalk")]
#[command(version)]
#[command(about = "Play and record MonkeyTalk UI test scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct AgentArgs {
    /// Agent name (Android, iOS, HTML, Flex, Generic)
    #[arg(short, long, default_value = DEFAULT_AGENT)]
    agent: String,

    /// Playback host of the agent
    #[arg(long)]
    host: Option<String>,

    /// Playback port of the agent (default depends on the agent)
    #[arg(long)]
    port: Option<u16>,
}

impl AgentArgs {
    fn resolve(&self) -> anyhow::Result<Arc<dyn Agent>> {
        let agent: Arc<dyn Agent> =
            AgentManager::default().agent(Some(&self.agent), self.host.as_deref(), self.port)?;
        Ok(agent)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script, or every script in a directory
    Run {
        /// Path to a .mt script or a directory of scripts
        path: PathBuf,

        #[command(flatten)]
        agent: AgentArgs,

        /// Global timeout for finding a component (ms)
        #[arg(long)]
        timeout: Option<u64>,

        /// Global pause before each command (ms)
        #[arg(long)]
        thinktime: Option<u64>,

        /// Seconds to wait for the agent to answer PING before playing
        #[arg(long, default_value = "30")]
        startup_timeout: u64,

        /// Do not capture screenshots on failure
        #[arg(long, default_value = "false")]
        no_screenshots: bool,

        /// Playback defaults (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory for reports and screenshots
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Generate reports (JSON, JUnit)
        #[arg(long, default_value = "false")]
        report: bool,
    },

    /// Check that an agent is reachable
    Ping {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Record commands from a device until Ctrl+C
    Record {
        #[command(flatten)]
        agent: AgentArgs,

        /// Host the agent should send recorded commands to
        #[arg(long, default_value = ServerConfig::DEFAULT_RECORD_HOST)]
        record_host: String,

        /// Port of the local record listener
        #[arg(long, default_value_t = ServerConfig::DEFAULT_RECORD_PORT)]
        record_port: u16,

        /// Script file to write (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            path,
            agent,
            timeout,
            thinktime,
            startup_timeout,
            no_screenshots,
            config,
            output,
            report,
        } => {
            let mut playback = match config {
                Some(file) => PlaybackConfig::load(&file)?,
                None => PlaybackConfig::default(),
            };
            if timeout.is_some() {
                playback.timeout_ms = timeout;
            }
            if thinktime.is_some() {
                playback.thinktime_ms = thinktime;
            }
            if no_screenshots {
                playback.screenshot_on_error = false;
            }
            playback.output_dir = Some(output.clone());

            println!(
                "{} Running scripts from: {}",
                "▶".green().bold(),
                path.display()
            );
            println!("  Agent: {}", agent.agent.cyan());

            let agent = agent.resolve()?;
            agent.start()?;
            if !agent.wait_until_ready(startup_timeout * 1000).await {
                anyhow::bail!(
                    "{} - agent not ready after {}s",
                    agent.name(),
                    startup_timeout
                );
            }

            let abort = AbortHandle::default();
            let on_interrupt = abort.clone();
            ctrlc::set_handler(move || {
                println!("\n{} Stopping after the current command...", "⏹".yellow());
                on_interrupt.abort();
            })?;

            let run = runner::run_scripts(&path, agent, playback, abort).await?;
            if report {
                report::write_reports(&run, &output)?;
            }
            if !run.all_passed() {
                std::process::exit(1);
            }
        }

        Commands::Ping { agent } => {
            let agent = agent.resolve()?;
            agent.start()?;
            let response = agent.command_sender()?.ping(None).await?;
            let status = if response.is_ok() {
                response.status.to_string().green().bold()
            } else {
                response.status.to_string().red().bold()
            };
            println!("{} PING {}", agent.name(), status);
            if let Some(info) = response.ping_info() {
                if let Some(os) = info.os {
                    println!("  OS: {}", os);
                }
                if let Some(version) = info.mtversion {
                    println!("  Agent version: {}", version);
                }
            } else if let Some(message) = &response.message {
                println!("  {}", message);
            }
            if !response.is_ok() {
                std::process::exit(1);
            }
        }

        Commands::Record {
            agent,
            record_host,
            record_port,
            output,
        } => {
            println!("{} Starting record mode...", "●".red().bold());

            let agent = agent.resolve()?;
            let session = Arc::new(RecordSession::default());
            let mut server = start_record_server(record_port, session.clone()).await?;
            session
                .start_recording(agent, &record_host, server.port())
                .await?;

            let stop_flag = Arc::new(AtomicBool::new(false));
            let stop_flag_handler = stop_flag.clone();
            ctrlc::set_handler(move || {
                println!("\n{} Stopping recording...", "⏹".yellow());
                stop_flag_handler.store(true, Ordering::SeqCst);
            })?;

            println!("   Listening on port {}", server.port());
            println!("   Interact with the app. Press Ctrl+C when done.\n");

            let mut lines = Vec::new();
            while !stop_flag.load(Ordering::SeqCst) {
                if let Some(command) = session.queue().poll(Duration::from_millis(500)).await {
                    println!("  {} {}", "●".red(), command);
                    lines.push(command.to_string());
                }
            }

            if let Err(e) = session.stop_recording().await {
                log::warn!("{:#}", e);
            }
            server.stop().await;

            let script = lines.iter().map(|l| format!("{}\n", l)).collect::<String>();
            match output {
                Some(path) => {
                    std::fs::write(&path, script)?;
                    println!("\n{} Recording complete!", "✓".green().bold());
                    println!("   Output: {}", path.display().to_string().cyan());
                }
                None => print!("{}", script),
            }
        }
    }

    Ok(())
}
