//! Scenarios and the programs that drive a Meeting's call logic.
//!
//! A Scenario is a small, swappable state machine: it holds a pool of
//! named [`Program`]s, a root program id, and the currently active
//! program. Event dispatch is synchronous from the dialog's point of
//! view — a transition on the UAS or UAC leg drives straight into the
//! active program's handler before the dialog returns to reading its
//! next message.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{SipError, SipResult};
use crate::meeting::Meeting;
use crate::register::Register;
use crate::store::Store;
use crate::transport::Transport;
use crate::types::Destination;

/// The external collaborators a program's `init`/event handlers need
/// beyond the Meeting they are running against: looking up a target
/// registration and sending messages as a fresh UAC leg.
pub struct ProgramContext {
    pub register: Arc<Register>,
    pub transport: Arc<dyn Transport>,
    pub server_host: String,
}

/// Which concrete program a configured program-id names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramType {
    #[serde(rename = "CALL_PROGRAMM")]
    Call,
    #[serde(rename = "REJECT_PROGRAMM")]
    Reject,
}

/// A scenario's static configuration: its id, root program, and the
/// table of program-id → program-kind it may activate. Individual
/// program configs are loaded separately, at
/// `/scenario/{id}/programm/{program_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: String,
    pub root_id: String,
    pub programs: HashMap<String, ProgramType>,
}

/// Configuration for [`Program::Call`]: bridges the inbound leg to a
/// resolved target, with an optional greeting played before the callee
/// is dialed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallProgramConfig {
    pub target: Option<Destination>,
    pub greeting: Option<String>,
}

/// Configuration for [`Program::Reject`]: rings the caller and, if
/// `hold_media` is set, answers and plays hold music instead of ever
/// placing an outgoing leg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectProgramConfig {
    pub hold_media: Option<String>,
}

/// Events the UAS leg of a Meeting's dialog reports to the active
/// program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UasEvent {
    Ready,
    End,
}

/// Events a Meeting's UAC leg reports to the active program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UacEventKind {
    Ringing,
    Ready,
    End,
}

/// Mutable runtime state for whichever program is currently active.
/// Carries its own configuration plus whatever bookkeeping it needs
/// across event callbacks (e.g. which UAC call-id it bridged to).
pub enum Program {
    Call {
        config: CallProgramConfig,
        uac_call_id: Option<String>,
    },
    Reject {
        config: RejectProgramConfig,
    },
}

impl Program {
    fn from_config(kind: ProgramType, call: CallProgramConfig, reject: RejectProgramConfig) -> Self {
        match kind {
            ProgramType::Call => Program::Call {
                config: call,
                uac_call_id: None,
            },
            ProgramType::Reject => Program::Reject { config: reject },
        }
    }

    /// Runs the program's `init` behavior against the Meeting it was
    /// just activated for.
    pub async fn init(&mut self, meeting: &mut Meeting, ctx: &ProgramContext) -> SipResult<()> {
        match self {
            Program::Call { config, uac_call_id } => {
                crate::programs::call_program_init(meeting, config, uac_call_id, ctx).await
            }
            Program::Reject { config } => crate::programs::reject_program_init(meeting, config).await,
        }
    }

    pub async fn on_uas_event(
        &mut self,
        event: UasEvent,
        meeting: &mut Meeting,
        ctx: &ProgramContext,
    ) -> SipResult<()> {
        match self {
            Program::Call { config, uac_call_id } => {
                crate::programs::call_program_on_uas_event(meeting, config, uac_call_id, event, ctx).await
            }
            Program::Reject { .. } => Ok(()),
        }
    }

    pub async fn on_uac_event(
        &mut self,
        event: UacEventKind,
        meeting: &mut Meeting,
        ctx: &ProgramContext,
    ) -> SipResult<()> {
        match self {
            Program::Call { config, uac_call_id } => {
                crate::programs::call_program_on_uac_event(meeting, config, uac_call_id, event, ctx).await
            }
            Program::Reject { .. } => Ok(()),
        }
    }
}

/// A Scenario's live program table plus the id of the one currently
/// running.
pub struct Scenario {
    pub id: String,
    programs: HashMap<String, Program>,
    active_id: String,
}

impl Scenario {
    /// Loads a Scenario's program table from the store: for every
    /// program id named in `config.programs`, fetches its concrete
    /// configuration at `/scenario/{id}/programm/{program_id}` and
    /// builds the matching [`Program`] variant.
    pub async fn load(store: &dyn Store, config: &ScenarioConfig) -> SipResult<Self> {
        if config.programs.is_empty() {
            return Err(SipError::EmptyScenario);
        }

        let mut programs = HashMap::new();
        for (program_id, kind) in &config.programs {
            let key = format!("/scenario/{}/programm/{}", config.id, program_id);
            let raw = store
                .get(&key)
                .await?
                .ok_or_else(|| SipError::UnknownProgram {
                    program_id: program_id.clone(),
                })?;

            let program = match kind {
                ProgramType::Call => {
                    let call_config: CallProgramConfig = serde_json::from_str(&raw)
                        .map_err(|e| SipError::store(format!("corrupt program config: {e}")))?;
                    Program::from_config(ProgramType::Call, call_config, RejectProgramConfig::default())
                }
                ProgramType::Reject => {
                    let reject_config: RejectProgramConfig = serde_json::from_str(&raw)
                        .map_err(|e| SipError::store(format!("corrupt program config: {e}")))?;
                    Program::from_config(ProgramType::Reject, CallProgramConfig::default(), reject_config)
                }
            };
            programs.insert(program_id.clone(), program);
        }

        if !programs.contains_key(&config.root_id) {
            return Err(SipError::UnknownProgram {
                program_id: config.root_id.clone(),
            });
        }

        Ok(Scenario {
            id: config.id.clone(),
            programs,
            active_id: config.root_id.clone(),
        })
    }

    /// Switches the active program, per `Scenario.next` in the original
    /// design.
    pub fn next(&mut self, program_id: &str) -> SipResult<()> {
        if !self.programs.contains_key(program_id) {
            return Err(SipError::UnknownProgram {
                program_id: program_id.to_string(),
            });
        }
        self.active_id = program_id.to_string();
        Ok(())
    }

    fn active_mut(&mut self) -> &mut Program {
        self.programs
            .get_mut(&self.active_id)
            .expect("active_id always names a program present in the table")
    }

    pub async fn run(&mut self, meeting: &mut Meeting, ctx: &ProgramContext) -> SipResult<()> {
        let mut program = std::mem::replace(
            self.active_mut(),
            Program::Reject {
                config: RejectProgramConfig::default(),
            },
        );
        let result = program.init(meeting, ctx).await;
        *self.active_mut() = program;
        result
    }

    pub async fn uas_emit(&mut self, event: UasEvent, meeting: &mut Meeting, ctx: &ProgramContext) -> SipResult<()> {
        let mut program = std::mem::replace(
            self.active_mut(),
            Program::Reject {
                config: RejectProgramConfig::default(),
            },
        );
        let result = program.on_uas_event(event, meeting, ctx).await;
        *self.active_mut() = program;
        result
    }

    pub async fn uac_emit(
        &mut self,
        event: UacEventKind,
        meeting: &mut Meeting,
        ctx: &ProgramContext,
    ) -> SipResult<()> {
        let mut program = std::mem::replace(
            self.active_mut(),
            Program::Reject {
                config: RejectProgramConfig::default(),
            },
        );
        let result = program.on_uac_event(event, meeting, ctx).await;
        *self.active_mut() = program;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn load_rejects_empty_program_table() {
        let store = MemoryStore::new();
        let config = ScenarioConfig {
            id: "s1".to_string(),
            root_id: "root".to_string(),
            programs: HashMap::new(),
        };
        assert!(Scenario::load(&store, &config).await.is_err());
    }

    #[tokio::test]
    async fn load_rejects_unknown_root() {
        let store = MemoryStore::new();
        store
            .put(
                "/scenario/s1/programm/a",
                &serde_json::to_string(&RejectProgramConfig::default()).unwrap(),
            )
            .await
            .unwrap();
        let mut programs = HashMap::new();
        programs.insert("a".to_string(), ProgramType::Reject);
        let config = ScenarioConfig {
            id: "s1".to_string(),
            root_id: "missing".to_string(),
            programs,
        };
        assert!(Scenario::load(&store, &config).await.is_err());
    }

    #[tokio::test]
    async fn load_builds_reject_program() {
        let store = MemoryStore::new();
        store
            .put(
                "/scenario/s1/programm/a",
                &serde_json::to_string(&RejectProgramConfig {
                    hold_media: Some("hold.wav".to_string()),
                })
                .unwrap(),
            )
            .await
            .unwrap();
        let mut programs = HashMap::new();
        programs.insert("a".to_string(), ProgramType::Reject);
        let config = ScenarioConfig {
            id: "s1".to_string(),
            root_id: "a".to_string(),
            programs,
        };
        let scenario = Scenario::load(&store, &config).await.unwrap();
        assert_eq!(scenario.id, "s1");
    }
}
