use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use pulsemix::actions::BpmActionFrequency;
use pulsemix::audio::capture::AudioCapture;
use pulsemix::audio::song::{load_wav, stream_wav_chunks, SongAnalyzer};
use pulsemix::blend::{BlendMode, Frame};
use pulsemix::config::MixerConfig;
use pulsemix::stream::{AudioEngine, CyclicFrameSource, VideoCombiner};

#[derive(Parser)]
#[command(name = "pulsemix", about = "Audio-reactive video mixer")]
struct Cli {
    /// Optional JSON config file; CLI flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a WAV file offline and print its features as JSON.
    Song {
        file: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// Run the live pipeline: audio in, blend decisions out.
    Stream {
        /// Feed a WAV file through the live path instead of capturing.
        #[arg(long)]
        from_wav: Option<PathBuf>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
        /// BPM trigger frequency: kick, compass, two_compass, four_compass.
        #[arg(long)]
        bpm_frequency: Option<BpmActionFrequency>,
        /// Lower chroma bound (0 = C .. 11 = B).
        #[arg(long)]
        min_pitch: Option<u8>,
        /// Upper chroma bound (0 = C .. 11 = B).
        #[arg(long)]
        max_pitch: Option<u8>,
        /// Blend operation for triggered frames.
        #[arg(long)]
        blend_mode: Option<BlendMode>,
        /// Seconds the blend strength takes to decay back to zero.
        #[arg(long)]
        falloff: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MixerConfig::from_json_file(path)?,
        None => MixerConfig::default(),
    };

    match cli.command {
        Command::Song { file, pretty } => run_song(config, file, pretty).await,
        Command::Stream {
            from_wav,
            duration,
            bpm_frequency,
            min_pitch,
            max_pitch,
            blend_mode,
            falloff,
        } => {
            let mut config = config;
            if bpm_frequency.is_some() {
                config.bpm_frequency = bpm_frequency;
            }
            if min_pitch.is_some() {
                config.min_pitch = min_pitch;
            }
            if max_pitch.is_some() {
                config.max_pitch = max_pitch;
            }
            if let Some(mode) = blend_mode {
                config.blend_mode = mode;
            }
            if let Some(falloff) = falloff {
                config.blend_falloff_sec = falloff;
            }
            run_stream(config, from_wav, duration).await
        }
    }
}

async fn run_song(mut config: MixerConfig, file: PathBuf, pretty: bool) -> Result<()> {
    // Offline analysis always reports both features.
    if config.bpm_frequency.is_none() {
        config.bpm_frequency = Some(BpmActionFrequency::Kick);
    }
    if config.min_pitch.is_none() || config.max_pitch.is_none() {
        config.min_pitch = Some(0);
        config.max_pitch = Some(11);
    }

    let mut analyzer = SongAnalyzer::new(config.build_song_processor()?);
    let features = analyzer.analyze(&file).await?;

    let json = if pretty {
        serde_json::to_string_pretty(&features)?
    } else {
        serde_json::to_string(&features)?
    };
    println!("{json}");
    Ok(())
}

async fn run_stream(
    mut config: MixerConfig,
    from_wav: Option<PathBuf>,
    duration: Option<u64>,
) -> Result<()> {
    info!("starting pulsemix stream");

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let (chunk_tx, chunk_rx) = tokio::sync::mpsc::unbounded_channel();

    // The audio source fixes the real sample rate before the buffers are
    // sized from it.
    let mut capture = None;
    match &from_wav {
        Some(path) => {
            let audio = load_wav(path)?;
            config.sample_rate = audio.sample_rate;
            tokio::spawn(stream_wav_chunks(audio, chunk_tx));
        }
        None => {
            let device = AudioCapture::new(chunk_tx)?;
            config.sample_rate = device.sample_rate();
            capture = Some(device);
        }
    }

    let actions = config.build_actions()?;
    let processor = config.build_stream_processor()?;

    let source = CyclicFrameSource::new(demo_clip(0), demo_clip(128), None, 30.0)?;
    let mut combiner = VideoCombiner::new(Box::new(source), config.build_mixer(), control_rx);
    let display = std::thread::spawn(move || combiner.run());

    let engine = AudioEngine::new(processor, actions, control_tx);
    engine
        .run(chunk_rx, duration.map(Duration::from_secs))
        .await?;

    display
        .join()
        .map_err(|_| anyhow::anyhow!("display thread panicked"))??;

    drop(capture);
    info!("pulsemix stream finished");
    Ok(())
}

/// Placeholder clip: a slowly sweeping gradient, enough to see blend
/// decisions land without a real frame source attached.
fn demo_clip(phase: u8) -> Vec<Frame> {
    const WIDTH: u32 = 64;
    const HEIGHT: u32 = 36;

    (0..30u32)
        .map(|index| {
            let data = (0..HEIGHT)
                .flat_map(|y| {
                    (0..WIDTH).flat_map(move |x| {
                        let value = (x * 4 + y * 2 + index * 8) as u8;
                        [
                            value.wrapping_add(phase),
                            value.wrapping_mul(2).wrapping_add(phase),
                            value.wrapping_add(64).wrapping_add(phase),
                        ]
                    })
                })
                .collect();
            Frame::new(WIDTH, HEIGHT, 3, data).expect("demo frame dimensions are consistent")
        })
        .collect()
}
