use std::sync::Mutex;
use std::time::{Duration, Instant};
use std::{panic, process};

use clap::{Arg, Command};

use streamview::config::PlayerSettings;
use streamview::context::AppContext;
use streamview::display::VideoFrame;
use streamview::events::{EventKind, PlayerSubscriber};
use streamview::local::{FileSource, LocalPlaybackEngine};
use streamview::remote::StreamClient;

/// Logs playback events; progress is throttled to once a second.
struct ConsoleSubscriber {
    last_report: Mutex<Instant>,
}

impl ConsoleSubscriber {
    fn new() -> Self {
        Self {
            last_report: Mutex::new(Instant::now()),
        }
    }
}

impl PlayerSubscriber for ConsoleSubscriber {
    fn on_frame(&self, frame: &VideoFrame) {
        log::trace!("frame {} ({}x{})", frame.seq, frame.width, frame.height);
    }

    fn on_playback_state(&self, playing: bool, paused: bool) {
        match (playing, paused) {
            (true, true) => log::info!("paused"),
            (true, false) => log::info!("playing"),
            (false, _) => log::info!("stopped"),
        }
    }

    fn on_progress(&self, position_secs: f64, duration_secs: f64) {
        let mut last = self.last_report.lock().unwrap();
        if last.elapsed() >= Duration::from_secs(1) {
            *last = Instant::now();
            if duration_secs > 0.0 {
                log::info!("position {position_secs:.1}s / {duration_secs:.1}s");
            } else {
                log::info!("position {position_secs:.1}s");
            }
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new("streamview")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("stream")
                .short('s')
                .long("stream")
                .value_name("URL")
                .help("Stream locator, e.g. webrtc://host/live/cam")
                .required(false),
        )
        .arg(
            Arg::new("signaling")
                .long("signaling")
                .value_name("URL")
                .help("HTTP signaling endpoint, e.g. http://host:1985/rtc/v1/play/")
                .required(false),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("PATH")
                .help("Play a local video file instead of a remote stream")
                .required(false),
        )
        .get_matches();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let context = AppContext::new();

    // gracefully wind down when receiving SIGINT, SIGTERM, or SIGHUP
    let signal_context = context.clone();
    ctrlc::set_handler(move || {
        signal_context.shutdown();
    })
    .expect("Error setting Ctrl-C handler");

    let stream = matches.get_one::<String>("stream");
    let file = matches.get_one::<String>("file");

    let code = match (stream, file) {
        (Some(stream_url), None) => {
            let Some(signaling_url) = matches.get_one::<String>("signaling") else {
                log::error!("--stream requires --signaling");
                process::exit(2);
            };
            run_remote(&context, signaling_url.clone(), stream_url.clone())
        }
        (None, Some(path)) => run_local(&context, path),
        _ => {
            log::error!("pass exactly one of --stream or --file");
            2
        }
    };

    process::exit(code);
}

fn run_remote(context: &AppContext, signaling_url: String, stream_url: String) -> i32 {
    let settings = PlayerSettings {
        signaling_url,
        stream_url,
        ..PlayerSettings::default()
    };

    let client = StreamClient::new(settings, context);
    let console = std::sync::Arc::new(ConsoleSubscriber::new());
    client
        .registry()
        .subscribe(EventKind::Frame, console.clone() as _);
    client
        .registry()
        .subscribe(EventKind::PlaybackState, console as _);

    if !client.open() {
        log::error!("cannot open the streaming session");
        return 1;
    }

    while !client.state().is_terminal() {
        if context
            .sos()
            .wait_cancellation_timeout(Duration::from_millis(100))
        {
            break;
        }
    }

    let code = match client.state() {
        streamview::remote::ConnectionState::Failed => 1,
        _ => 0,
    };
    client.close();
    code
}

fn run_local(context: &AppContext, path: &str) -> i32 {
    let source = match FileSource::open(path) {
        Ok(source) => source,
        Err(err) => {
            log::error!("cannot open {path}: {err}");
            return 1;
        }
    };

    let engine = LocalPlaybackEngine::new();
    let console = std::sync::Arc::new(ConsoleSubscriber::new());
    engine
        .registry()
        .subscribe(EventKind::PlaybackState, console.clone() as _);
    engine
        .registry()
        .subscribe(EventKind::Progress, console as _);

    if !engine.open(Box::new(source)) {
        log::error!("cannot start playback of {path}");
        return 1;
    }
    engine.play();

    context.sos().wait_cancellation();
    engine.close();
    0
}
