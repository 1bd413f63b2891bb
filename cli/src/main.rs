#[macro_use]
extern crate clap;

use clap::{App, ArgMatches};
use env_logger::{Builder, Env};
use indicatif::{ProgressBar, ProgressStyle};
use std::{path::Path, process, sync::Arc};
use tarpull::{
    CancellationToken, ContentDigest, DefaultRegistry, ImageName, Platform, PullObserver,
    PullState, Puller,
};

const EXIT_FAILED: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

struct BarObserver {
    bar: ProgressBar,
}

impl PullObserver for BarObserver {
    fn log(&self, level: log::Level, message: &str) {
        if level == log::Level::Info {
            self.bar.set_message(message.to_owned());
        }
    }

    fn layer_progress(&self, digest: &ContentDigest, percent: u8) {
        self.bar
            .set_message(format!("{} {:>3}%", &digest.hex_str()[..12], percent));
    }

    fn overall_progress(&self, percent: u8) {
        self.bar.set_position(percent as u64);
    }

    fn state_changed(&self, state: PullState) {
        self.bar.set_prefix(state.to_string());
    }
}

#[tokio::main]
async fn main() {
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml)
        .version(crate_version!())
        .get_matches();

    let log_level = matches.value_of("log_level").unwrap();
    Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let image: ImageName = parse_or_exit(&matches, "image_reference");
    let platform: Platform = parse_or_exit(&matches, "arch");
    let jobs: usize = parse_or_exit(&matches, "jobs");

    let mut default_registry = DefaultRegistry::docker_hub();
    if let Some(host) = matches.value_of("registry") {
        let host = host.parse().unwrap_or_else(|err| exit_with(err));
        default_registry = default_registry.mirror(host);
    }

    let mut builder = Puller::builder()
        .registry(&default_registry)
        .concurrency(jobs)
        .verify_digests(!matches.is_present("no_verify"));
    if let Some(dir) = matches.value_of("output") {
        builder = builder.output_dir(Path::new(dir));
    }
    if let Some(url) = matches.value_of("proxy") {
        builder = builder.proxy(url);
    }
    if matches.is_present("insecure") {
        builder = builder.danger_accept_invalid_certs();
    }
    if let Some(username) = matches.value_of("username") {
        let registry = default_registry.resolve(&image).registry;
        builder = builder.login(
            registry,
            username.to_owned(),
            matches.value_of("password").map(str::to_owned),
        );
    }
    let puller = builder.build().unwrap_or_else(|err| exit_with(err));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling the pull");
            interrupt.cancel();
        }
    });

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>20} [{wide_bar}] {pos:>3}% {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    let observer = Arc::new(BarObserver { bar: bar.clone() });

    match puller.pull(&image, &platform, observer, &cancel).await {
        Ok(pulled) => {
            bar.finish_and_clear();
            println!("{}", pulled.archive.display());
        }
        Err(err) if err.is_cancelled() => {
            bar.abandon();
            process::exit(EXIT_CANCELLED);
        }
        Err(err) => {
            bar.abandon();
            exit_with(err)
        }
    }
}

fn parse_or_exit<T>(matches: &ArgMatches, name: &str) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value = matches.value_of(name).unwrap();
    value.parse().unwrap_or_else(|err| {
        log::error!("bad value for {}: {}", name, err);
        process::exit(EXIT_FAILED);
    })
}

fn exit_with<E: std::fmt::Display>(err: E) -> ! {
    log::error!("{}", err);
    process::exit(EXIT_FAILED)
}
