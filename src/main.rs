//! Tonedeck CLI - demo driver for the session engine

use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tonedeck::{
    Score, ScoreSequencer, SequencerEvent, Session, SessionState, SourceDescriptor,
    POLL_INTERVAL_MS,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "tonedeck")]
#[command(about = "Multi-source audio session engine", long_about = None)]
struct Cli {
    /// Master volume 0.0-1.0
    #[arg(short, long, default_value = "0.8", global = true)]
    volume: f32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a local WAV or MP3 file
    File {
        /// Path to the audio file
        path: String,

        /// Stop after this many seconds (0 = play to the end)
        #[arg(short, long, default_value = "0")]
        duration: f64,
    },

    /// Stream a remote audio resource
    Url {
        /// http(s) address of the resource
        url: String,

        /// Stop after this many seconds (0 = play to the end)
        #[arg(short, long, default_value = "0")]
        duration: f64,
    },

    /// Play the generative chord stream
    Chords {
        /// Seconds to play
        #[arg(short, long, default_value = "16")]
        duration: f64,
    },

    /// Perform a JSON score on the virtual instrument
    Score {
        /// Path to the score file: an array of {"code","duration"} objects
        path: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut session = Session::new()?;
    session.set_volume(cli.volume);

    match cli.command {
        Commands::File { path, duration } => {
            let bytes = std::fs::read(&path)?;
            session.load_source(SourceDescriptor::File { bytes })?;
            run_transport(&mut session, duration)?;
        }
        Commands::Url { url, duration } => {
            session.load_source(SourceDescriptor::Url { url })?;
            run_transport(&mut session, duration)?;
        }
        Commands::Chords { duration } => {
            session.load_source(SourceDescriptor::Stream)?;
            session.play();
            std::thread::sleep(Duration::from_secs_f64(duration));
            session.stop();
        }
        Commands::Score { path } => {
            let score = Score::from_json(&std::fs::read_to_string(&path)?)?;
            session.load_source(SourceDescriptor::Instrument)?;
            session.play();
            perform_score(&mut session, &score)?;
        }
    }
    Ok(())
}

/// Wait for the source to come up, play it, and poll until it ends (or the
/// requested duration passes).
fn run_transport(session: &mut Session, duration: f64) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let snapshot = session.poll();
        match snapshot.state {
            SessionState::Ready => break,
            SessionState::Error => {
                return Err(snapshot
                    .error_message
                    .unwrap_or_else(|| "load failed".to_string())
                    .into());
            }
            _ => std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS)),
        }
    }

    session.play();
    let mut played = 0.0;
    loop {
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        played += POLL_INTERVAL_MS as f64 / 1000.0;
        let snapshot = session.poll();
        info!(
            "{:?} {:.1}s / {:.1}s",
            snapshot.state, snapshot.current_time, snapshot.duration
        );
        if snapshot.state != SessionState::Playing {
            break;
        }
        if duration > 0.0 && played >= duration {
            session.stop();
            break;
        }
    }
    Ok(())
}

/// Drive the sequencer and forward its triggers to the instrument.
fn perform_score(session: &mut Session, score: &Score) -> Result<(), Box<dyn std::error::Error>> {
    let (mut sequencer, events) = ScoreSequencer::new();
    sequencer.play(score)?;
    loop {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(SequencerEvent::Trigger(key)) => session.trigger_instrument_note(key),
            Ok(SequencerEvent::Highlight(key)) => info!("key {key}"),
            Ok(SequencerEvent::ClearHighlight) => {}
            Ok(SequencerEvent::Finished) => break,
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Let the last note's decay ring out
    std::thread::sleep(Duration::from_millis(1500));
    Ok(())
}
