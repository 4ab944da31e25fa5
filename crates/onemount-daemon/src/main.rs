//! `onemountd` — the background filesystem daemon, intended to run as a
//! systemd user service. Reads its configuration from a YAML file (default
//! path, or a path given as the first argument) and hands off to
//! [`onemount_daemon::run`].

use onemount_core::config::Config;

fn main() {
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from).unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let filter = if config.logging.debug || std::env::var("ONEMOUNT_DEBUG").is_ok() {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    if let Err(errors) = validate_or_exit(&config) {
        for e in errors {
            eprintln!("invalid configuration: {e}");
        }
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(onemount_daemon::run(config)) {
        eprintln!("onemount daemon failed: {e:#}");
        std::process::exit(onemount_daemon::exit_code_for(&e));
    }
}

fn validate_or_exit(config: &Config) -> Result<(), Vec<onemount_core::config::ValidationError>> {
    let errors = config.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
