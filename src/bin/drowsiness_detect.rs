use clap::Parser;
use opencv::{
    core::{Size, Vector},
    highgui, imgcodecs,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drowsiness_detect::{
    report::Report,
    source::{FrameSource, InputKind},
    Config, Detect, Detector, FrameAnalyzer, FrameOutcome, RetentionRule, TimeoutDetector,
};

const WINDOW_NAME: &str = "Drowsiness Detection";
const ESC: i32 = 27;

#[derive(Parser)]
#[command(
    name = "drowsiness-detect",
    about = "Flag sleeping occupants in an image or video",
    version
)]
struct Args {
    /// Image (jpg, jpeg, png) or video (mp4, avi, mov)
    #[arg(short, long)]
    input: PathBuf,

    /// JSON configuration; defaults apply when the file is absent
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Detection model, overrides the config
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// "cpu" or "cuda", overrides the config
    #[arg(long)]
    device: Option<String>,

    /// Save the annotated image, or the annotated video as mp4
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write per-frame verdicts to this JSON file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Show annotated frames in a window
    #[arg(short, long)]
    visualize: bool,
}

struct Session {
    analyzer: FrameAnalyzer<dyn Detect>,
    kind: InputKind,
    output: Option<PathBuf>,
    writer: Option<VideoWriter>,
    fps: f64,
    report: Report,
    show_visualization: bool,
}

impl Session {
    /// Process every frame; returns how many were read.
    fn run(&mut self, source: &mut FrameSource) -> anyhow::Result<usize> {
        let mut frame_id = 0;
        while let Some(frame) = source.next_frame()? {
            if !self.process_frame(&frame, frame_id)? {
                break;
            }
            frame_id += 1;
            if self.kind == InputKind::Video && frame_id % 100 == 0 {
                log::info!("processed {} frames", frame_id);
            }
        }
        Ok(frame_id)
    }

    /// Returns `false` when the user asked to stop.
    fn process_frame(&mut self, frame: &Mat, frame_id: usize) -> anyhow::Result<bool> {
        let (verdict, analyzed) = match self.analyzer.analyze_or_fallback(frame) {
            FrameOutcome::Analyzed(v) => (v, true),
            FrameOutcome::Fallback(v) => (v, false),
            FrameOutcome::Skipped(_) => {
                log::info!("frame {}: skipped", frame_id);
                return Ok(true);
            }
        };

        log::info!(
            "frame {}: Mode State: {}, People Sleeping: {}",
            frame_id,
            verdict.mode_state(),
            verdict.sleeping_count()
        );
        self.report
            .record(frame_id, verdict.summary, &verdict.retained, analyzed);

        if self.kind == InputKind::Image {
            println!("Mode State: {}", verdict.mode_state());
            println!("People Sleeping: {}", verdict.sleeping_count());
        }

        self.write_output(&verdict.annotated)?;

        if self.show_visualization {
            highgui::imshow(WINDOW_NAME, &verdict.annotated)?;
            let wait = if self.kind == InputKind::Image { 0 } else { 1 };
            if highgui::wait_key(wait)? == ESC {
                log::info!("interrupted by user");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Finalize the video file and write the report. Runs on every exit path.
    fn finish(&mut self) -> anyhow::Result<()> {
        let released = match &mut self.writer {
            Some(writer) => writer.release(),
            None => Ok(()),
        };
        if let Some(path) = self.report.save()? {
            log::info!("report saved to {:?}", path);
        }
        released?;
        Ok(())
    }

    fn write_output(&mut self, annotated: &Mat) -> anyhow::Result<()> {
        let Some(path) = &self.output else {
            return Ok(());
        };
        match self.kind {
            InputKind::Image => {
                imgcodecs::imwrite(&path.to_string_lossy(), annotated, &Vector::new())?;
                log::info!("annotated image written to {:?}", path);
            }
            InputKind::Video => {
                if self.writer.is_none() {
                    self.writer = Some(open_writer(path, self.fps, annotated.size()?)?);
                }
                if let Some(writer) = &mut self.writer {
                    writer.write(annotated)?;
                }
            }
        }
        Ok(())
    }
}

fn open_writer(path: &Path, fps: f64, size: Size) -> anyhow::Result<VideoWriter> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, fps, size, true)?;
    if !writer.is_opened()? {
        anyhow::bail!("failed to open video writer for {:?}", path);
    }
    log::info!("writing annotated video to {:?}", path);
    Ok(writer)
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.config.exists() {
        log::info!("loading configuration from {:?}", args.config);
        Config::from_file(&args.config)?
    } else {
        log::info!("{:?} not found, using default configuration", args.config);
        Config::default()
    };
    if let Some(weights) = &args.weights {
        config.model_path = weights.to_string_lossy().into_owned();
    }
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // reject unsupported inputs before paying for the model load
    InputKind::from_path(&args.input)?;
    let config = load_config(&args)?;

    let detector = Arc::new(Detector::new(
        &config.model_path,
        &config.device,
        (config.input_size[0] as i64, config.input_size[1] as i64),
        config.conf_threshold,
        config.nms_threshold,
    )?);
    let detector: Arc<dyn Detect> = match config.inference_timeout() {
        Some(timeout) => {
            log::info!("inference deadline {:?}", timeout);
            Arc::new(TimeoutDetector::new(detector, timeout))
        }
        None => detector,
    };

    let mut source = FrameSource::open(&args.input, config.video_frame_size)?;
    let fps = source.fps().unwrap_or(30.0);

    if args.visualize {
        highgui::named_window(WINDOW_NAME, highgui::WINDOW_NORMAL)?;
    }

    let mut session = Session {
        analyzer: FrameAnalyzer::new(detector, RetentionRule::from_config(&config)),
        kind: source.kind(),
        output: args.output.clone(),
        writer: None,
        fps,
        report: Report::new(args.report.clone()),
        show_visualization: args.visualize,
    };

    let result = session.run(&mut source);
    let finished = session.finish();
    let frame_count = result?;
    finished?;
    log::info!("done, {} frame(s) processed", frame_count);
    Ok(())
}
