use std::{collections::HashMap, env, fs, process::ExitCode, time::Instant};

use opal_planner::{
    config::Config,
    decorator::StaticRegistry,
    event::EventStream,
    session::{Session, TransportScope},
};
use serde::Deserialize;

/// On-disk fixture: an event stream plus the ambient session state the builder
/// reads from for literal decorators (`@env.*`, `@cwd`).
#[derive(Deserialize)]
struct Fixture {
    event_stream: EventStream,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default = "default_cwd")]
    cwd: String,
}

fn default_cwd() -> String {
    "/".to_owned()
}

fn default_path() -> &'static str {
    "example.json"
}

/// `Session` impl backed directly by a deserialized `Fixture`, instead of
/// `opal_planner::session::TestSession`, so the CLI owns no intermediate copy
/// of the fixture's env map.
struct FixtureSession {
    env: HashMap<String, String>,
    cwd: String,
}

impl Session for FixtureSession {
    fn scope(&self) -> TransportScope {
        TransportScope::Local
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn working_dir(&self) -> String {
        self.cwd.clone()
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { args[1].as_str() } else { default_path() };
    let target = args.get(2).cloned();

    let fixture = match read_fixture(file_path) {
        Ok(fixture) => fixture,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let session = FixtureSession { env: fixture.env, cwd: fixture.cwd };
    let registry = StaticRegistry::new();
    let mut config = Config::new();
    if let Some(target) = target {
        config = config.with_target(target);
    }

    let start = Instant::now();
    match opal_planner::plan(&fixture.event_stream, &session, &registry, config) {
        Ok(plan) => {
            let elapsed = start.elapsed();
            eprintln!("planned {} step(s) in {elapsed:?}", plan.steps.len());
            match serde_json::to_string_pretty(&plan) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("error: failed to serialize plan: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}: {err}");
            ExitCode::FAILURE
        }
    }
}

fn read_fixture(file_path: &str) -> Result<Fixture, String> {
    eprintln!("reading fixture: {file_path}");
    let contents = match fs::metadata(file_path) {
        Ok(metadata) if !metadata.is_file() => return Err(format!("{file_path} is not a file")),
        Ok(_) => fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))?,
        Err(err) => return Err(format!("reading {file_path}: {err}")),
    };
    serde_json::from_str(&contents).map_err(|err| format!("parsing {file_path}: {err}"))
}
