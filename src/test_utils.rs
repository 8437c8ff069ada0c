//! In-memory `pactl` for unit tests
//!
//! `FakePactl` answers the handful of subcommands the crate uses, keeping a
//! module table and a sink table that load/unload calls mutate the way a real
//! server would.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::audio_server::AudioServer;
use crate::command::{CommandError, CommandRunner};
use crate::pactl::{AudioCtl, Pactl, RAOP_MODULE};

#[derive(Debug)]
struct FakeModule {
    id: u32,
    name: String,
}

#[derive(Debug)]
struct FakeSink {
    index: u32,
    name: String,
    owner: u32,
}

#[derive(Debug)]
struct FakeState {
    server: AudioServer,
    modules: Vec<FakeModule>,
    sinks: Vec<FakeSink>,
    next_module_id: u32,
    next_sink_index: u32,
    /// Whether `load-module` prints the new id (both real servers do)
    load_prints_id: bool,
    /// Fixed id handed out for the RAOP module, as `pipewire-pulse` does
    canonical_raop_id: Option<u32>,
    /// One-shot failures keyed by argument prefix (`"load-module"`, `"list sinks"`)
    failures: HashMap<String, String>,
    calls: Vec<Vec<String>>,
}

/// Shared-state fake; clones observe the same server
#[derive(Debug, Clone)]
pub(crate) struct FakePactl {
    state: Arc<Mutex<FakeState>>,
}

impl FakePactl {
    pub fn new(server: AudioServer) -> Self {
        let canonical_raop_id = (server == AudioServer::PipeWire).then_some(536_870_913);
        Self {
            state: Arc::new(Mutex::new(FakeState {
                server,
                modules: vec![
                    FakeModule {
                        id: 1,
                        name: "module-device-restore".to_string(),
                    },
                    FakeModule {
                        id: 2,
                        name: "module-native-protocol-unix".to_string(),
                    },
                ],
                sinks: Vec::new(),
                next_module_id: 20,
                next_sink_index: 1,
                load_prints_id: true,
                canonical_raop_id,
                failures: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn ctl(&self) -> AudioCtl<Self> {
        AudioCtl::new(self.clone(), Pactl::default())
    }

    /// Pretend the RAOP module was already loaded by someone else
    pub fn preload_raop(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.load_raop().to_string()
    }

    /// Load an unrelated module, as another application would
    pub fn load_other_module(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_module_id;
        state.next_module_id += 1;
        state.modules.push(FakeModule {
            id,
            name: name.to_string(),
        });
        id.to_string()
    }

    /// Unload the RAOP module behind the toggle's back
    pub fn external_unload_raop(&self) {
        let mut state = self.state.lock().unwrap();
        state.unload_by_name(RAOP_MODULE);
    }

    /// Add a sink owned by a freshly loaded `module-raop-sink` instance
    pub fn add_raop_sink(&self, name: &str) -> String {
        let owner = self.load_other_module("module-raop-sink");
        self.add_sink(name, &owner);
        owner
    }

    /// Add a sink record with an explicit owner module id
    pub fn add_sink(&self, name: &str, owner: &str) {
        let mut state = self.state.lock().unwrap();
        let index = state.next_sink_index;
        state.next_sink_index += 1;
        state.sinks.push(FakeSink {
            index,
            name: name.to_string(),
            owner: owner.parse().expect("numeric owner id"),
        });
    }

    /// Override the fixed RAOP id; `None` hands out a fresh id per load
    pub fn set_canonical_raop_id(&self, id: Option<u32>) {
        self.state.lock().unwrap().canonical_raop_id = id;
    }

    pub fn set_load_prints_id(&self, prints: bool) {
        self.state.lock().unwrap().load_prints_id = prints;
    }

    /// Make the next command whose arguments start with `prefix` fail
    pub fn fail_next(&self, prefix: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(prefix.to_string(), stderr.to_string());
    }

    pub fn raop_loaded(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .modules
            .iter()
            .any(|m| m.name == RAOP_MODULE)
    }

    pub fn sink_count(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    /// Number of calls whose arguments (without the program) start with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|argv| argv[1..].join(" ").starts_with(prefix))
            .count()
    }

    fn execute(&self, argv: &[String]) -> Result<Vec<String>, CommandError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(argv.to_vec());

        let program = argv.first().cloned().unwrap_or_default();
        let args = argv[1..].join(" ");
        let failed = |stderr: String| CommandError::Failed {
            program: program.clone(),
            code: Some(1),
            stderr,
        };

        let failure = state
            .failures
            .keys()
            .find(|prefix| args.starts_with(prefix.as_str()))
            .cloned();
        if let Some(prefix) = failure {
            let stderr = state.failures.remove(&prefix).unwrap_or_default();
            return Err(failed(stderr));
        }

        if state.server == AudioServer::Unknown {
            return Err(failed("Connection failure: Connection refused\n".to_string()));
        }

        match argv[1..].iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["info"] => Ok(state.info_lines()),
            ["list", "modules", "short"] => Ok(state
                .modules
                .iter()
                .map(|m| format!("{}\t{}\t\t", m.id, m.name))
                .collect()),
            ["load-module", name] if *name == RAOP_MODULE => {
                let id = state.load_raop();
                Ok(if state.load_prints_id {
                    vec![id.to_string()]
                } else {
                    Vec::new()
                })
            }
            ["unload-module", target] => {
                let removed = match target.parse::<u32>() {
                    Ok(id) => state.unload_by_id(id),
                    Err(_) => state.unload_by_name(target),
                };
                if removed {
                    Ok(Vec::new())
                } else {
                    Err(failed("Failure: No such entity\n".to_string()))
                }
            }
            ["list", "sinks"] => Ok(state.sink_listing()),
            _ => Err(failed(format!("Unsupported fake command: {args}\n"))),
        }
    }
}

impl FakeState {
    fn info_lines(&self) -> Vec<String> {
        let name = match self.server {
            AudioServer::PipeWire => "PulseAudio (on PipeWire 1.0.5)",
            _ => "pulseaudio",
        };
        vec![
            "Server String: /run/user/1000/pulse/native".to_string(),
            "Library Protocol Version: 35".to_string(),
            format!("Server Name: {name}"),
            "Server Version: 16.1".to_string(),
        ]
    }

    fn load_raop(&mut self) -> u32 {
        let id = self.canonical_raop_id.unwrap_or_else(|| {
            let id = self.next_module_id;
            self.next_module_id += 1;
            id
        });
        self.modules.push(FakeModule {
            id,
            name: RAOP_MODULE.to_string(),
        });
        id
    }

    fn unload_by_id(&mut self, id: u32) -> bool {
        let before = self.modules.len() + self.sinks.len();
        self.modules.retain(|m| m.id != id);
        self.sinks.retain(|s| s.owner != id);
        before != self.modules.len() + self.sinks.len()
    }

    fn unload_by_name(&mut self, name: &str) -> bool {
        let ids: Vec<u32> = self
            .modules
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.id)
            .collect();
        for id in &ids {
            self.unload_by_id(*id);
        }
        !ids.is_empty()
    }

    fn sink_listing(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for sink in &self.sinks {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(format!("Sink #{}", sink.index));
            lines.push("\tState: SUSPENDED".to_string());
            lines.push(format!("\tName: {}", sink.name));
            lines.push(format!("\tDescription: {}", sink.name));
            lines.push("\tDriver: module-raop-sink.c".to_string());
            lines.push(format!("\tOwner Module: {}", sink.owner));
            lines.push("\tProperties:".to_string());
            lines.push(format!("\t\tdevice.description = \"{}\"", sink.name));
        }
        lines
    }
}

impl CommandRunner for FakePactl {
    async fn run(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                program: argv.first().cloned().unwrap_or_default(),
            });
        }
        self.execute(argv)
    }
}
