use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use eikaiwa_voice::chat::{ChatClient, ConversationHistory};
use eikaiwa_voice::voice::{
    CommandEngine, CommandSynthesizer, PcmFormat, SpeechCaptureController, SpeechSynthesizer,
    SystemPlayer, TtsPipeline, UnavailableSynthesizer, clamp_speaking_rate, pcm_to_wav, sanitize,
};
use eikaiwa_voice::{Config, ResilientClient, TurnOutcome, VoiceConversation};

/// Eikaiwa - voice I/O for an English conversation tutor
#[derive(Parser)]
#[command(name = "eikaiwa", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Remote TTS voice name
    #[arg(long, global = true)]
    voice: Option<String>,

    /// Speaking rate (0.25 to 4.0)
    #[arg(long, global = true)]
    rate: Option<f32>,

    /// Skip remote synthesis and use the on-device voice only
    #[arg(long, global = true)]
    no_remote_tts: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text aloud
    Speak {
        /// Text to speak (markdown and emoji are stripped)
        text: String,
    },
    /// Send a message to the tutor and speak the reply
    Chat {
        /// Message text
        text: String,
        /// Fetch reply audio in the same request
        #[arg(long)]
        with_audio: bool,
        /// Print the reply without speaking it
        #[arg(long)]
        quiet: bool,
    },
    /// Recognize one utterance with an external recognizer and print it
    Listen {
        /// Recognizer command; each stdout line is the latest hypothesis
        #[arg(trailing_var_arg = true, required = true)]
        recognizer: Vec<String>,
    },
    /// Listen, send what was heard to the tutor, and speak the reply
    Talk {
        /// Number of turns (0 keeps going until nothing is heard)
        #[arg(long, default_value = "1")]
        turns: usize,
        /// Recognizer command; each stdout line is the latest hypothesis
        #[arg(trailing_var_arg = true, required = true)]
        recognizer: Vec<String>,
    },
    /// Fetch and speak the tutor's welcome message
    Welcome,
    /// Show backend health and configured services
    Status,
    /// Print text as it would be spoken
    Sanitize {
        text: String,
    },
    /// Wrap a raw PCM file in a WAV container
    PcmToWav {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = "24000")]
        rate: u32,
        #[arg(long, default_value = "1")]
        channels: u16,
        #[arg(long, default_value = "16")]
        bits: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,eikaiwa_voice=info",
        1 => "info,eikaiwa_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Sanitize { ref text } => {
            println!("{}", sanitize(text));
            return Ok(());
        }
        Command::PcmToWav {
            ref input,
            ref output,
            rate,
            channels,
            bits,
        } => {
            let pcm = std::fs::read(input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let wav = pcm_to_wav(
                &pcm,
                PcmFormat {
                    sample_rate: rate,
                    channels,
                    bits_per_sample: bits,
                },
            );
            std::fs::write(output, &wav)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("wrote {} bytes to {}", wav.len(), output.display());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let client = Arc::new(ResilientClient::from_config(&config.api, &config.retry)?);
    let chat = ChatClient::new(Arc::clone(&client), config.chat.clone());

    let synthesizer: Arc<dyn SpeechSynthesizer> = match CommandSynthesizer::detect() {
        Some(synth) => Arc::new(synth),
        None => {
            tracing::warn!("no on-device synthesizer found, fallback speech disabled");
            Arc::new(UnavailableSynthesizer)
        }
    };
    let tts = TtsPipeline::new(
        client,
        synthesizer,
        Arc::new(SystemPlayer::new()),
        config.voice.clone(),
    );

    match cli.command {
        Command::Speak { text } => {
            if !tts.speak(&text).await {
                anyhow::bail!("nothing could be spoken");
            }
        }
        Command::Chat {
            text,
            with_audio,
            quiet,
        } => {
            let history = ConversationHistory::new();
            if with_audio && !quiet {
                let combined = chat
                    .respond_with_audio(&text, &history, tts.voice())
                    .await
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
                println!("{}", combined.reply);
                tts.play_synthesis(combined.synthesis(), combined.speech_text())
                    .await;
            } else {
                let reply = chat
                    .respond(&text, &history)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
                println!("{}", reply.reply);
                if let Some(suggestions) = reply.suggestions.filter(|s| !s.is_empty()) {
                    for suggestion in suggestions {
                        println!("  - {suggestion}");
                    }
                }
                if !quiet {
                    tts.speak(&reply.reply).await;
                }
            }
        }
        Command::Listen { recognizer } => {
            let capture = SpeechCaptureController::new(Arc::new(recognizer_engine(&recognizer)?));
            match capture
                .listen(config.voice.recognition_timeout)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?
            {
                Some(text) => println!("{text}"),
                None => anyhow::bail!("nothing was heard"),
            }
        }
        Command::Talk { turns, recognizer } => {
            let capture = SpeechCaptureController::new(Arc::new(recognizer_engine(&recognizer)?));
            let conversation =
                VoiceConversation::new(capture, chat, tts, config.voice.recognition_timeout);

            let mut taken = 0;
            while turns == 0 || taken < turns {
                taken += 1;
                match conversation.turn().await {
                    TurnOutcome::Replied {
                        user_text, reply, ..
                    } => {
                        println!("you:   {user_text}");
                        println!("tutor: {reply}");
                    }
                    TurnOutcome::NothingHeard => {
                        println!("(nothing heard)");
                        break;
                    }
                    TurnOutcome::Failed { message } => {
                        eprintln!("{message}");
                        break;
                    }
                }
            }
        }
        Command::Welcome => {
            let message = chat.welcome().await?;
            println!("{message}");
            tts.speak(&message).await;
        }
        Command::Status => {
            let health = chat.health().await?;
            let status = chat.status().await?;
            println!("backend:               {} ({})", health.status, health.service);
            println!("gemini:                {}", status.gemini_configured);
            println!("google credentials:    {}", status.google_credentials_configured);
            println!("gemini tts:            {}", status.gemini_tts_configured);
            println!("tts:                   {}", status.tts_configured);
        }
        Command::Sanitize { .. } | Command::PcmToWav { .. } => {}
    }

    Ok(())
}

fn recognizer_engine(command: &[String]) -> anyhow::Result<CommandEngine> {
    let (program, args) = command
        .split_first()
        .context("a recognizer command is required")?;
    Ok(CommandEngine::new(program, args.to_vec())?)
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(url) = &cli.api_url {
        config.api.base_url.clone_from(url);
    }
    if let Some(voice) = &cli.voice {
        config.voice.voice_name.clone_from(voice);
    }
    if let Some(rate) = cli.rate {
        config.voice.speaking_rate = clamp_speaking_rate(rate);
    }
    if cli.no_remote_tts {
        config.voice.remote_tts_enabled = false;
    }

    tracing::debug!(
        api = %config.api.base_url,
        voice = %config.voice.voice_name,
        remote_tts = config.voice.remote_tts_enabled,
        "configuration loaded"
    );

    Ok(config)
}
