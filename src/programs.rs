//! Concrete program behaviors a Scenario can activate: `CallProgram`
//! (bridge the inbound leg to a resolved target) and `RejectProgram`
//! (ring and optionally hold-music the caller, placing no outgoing leg).

use std::sync::Arc;

use crate::dialog::Uac;
use crate::error::SipResult;
use crate::media::{InMemoryMediaChannel, MediaChannel};
use crate::meeting::Meeting;
use crate::scenario::{CallProgramConfig, ProgramContext, RejectProgramConfig, UacEventKind, UasEvent};

/// Resolves the bridge target: the program's explicit override, or the
/// inbound INVITE's `To` if none was configured.
fn resolve_target(meeting: &Meeting, config: &CallProgramConfig) -> SipResult<crate::types::Destination> {
    if let Some(target) = &config.target {
        return Ok(target.clone());
    }
    let invite = meeting
        .uas
        .history
        .get_invite()
        .ok_or_else(|| crate::error::SipError::UnknownDialog {
            call_id: meeting.uas.call_id.clone(),
        })?;
    crate::dialog::parse_destination(invite.headers.require_one("to")?)
}

pub async fn call_program_init(
    meeting: &mut Meeting,
    config: &mut CallProgramConfig,
    uac_call_id: &mut Option<String>,
    ctx: &ProgramContext,
) -> SipResult<()> {
    let target = resolve_target(meeting, config)?;
    let registration = ctx.register.load_by_destination(&target).await?;

    let invite = meeting
        .uas
        .history
        .get_invite()
        .ok_or_else(|| crate::error::SipError::UnknownDialog {
            call_id: meeting.uas.call_id.clone(),
        })?
        .clone();
    let from = crate::dialog::parse_destination(invite.headers.require_one("from")?)?;

    let uac = Uac::new(
        ctx.transport.clone(),
        ctx.server_host.clone(),
        registration,
        from,
        new_media_channel(),
    );
    *uac_call_id = Some(uac.call_id.clone());
    meeting.append_uac(uac);

    if config.greeting.is_some() {
        meeting.uas.accept().await?;
    } else if let Some(uac) = meeting.sole_uac_mut() {
        uac.call().await?;
    }

    Ok(())
}

pub async fn call_program_on_uas_event(
    meeting: &mut Meeting,
    config: &CallProgramConfig,
    uac_call_id: &Option<String>,
    event: UasEvent,
    _ctx: &ProgramContext,
) -> SipResult<()> {
    match event {
        UasEvent::Ready => {
            if let Some(greeting) = &config.greeting {
                meeting.uas.media.play(&[greeting.clone()]);
                if let Some(call_id) = uac_call_id {
                    if let Some(uac) = meeting.uac_mut(call_id) {
                        uac.media.beeps();
                        uac.call().await?;
                    }
                }
            }
            Ok(())
        }
        UasEvent::End => {
            if let Some(call_id) = uac_call_id {
                if let Some(uac) = meeting.uac_mut(call_id) {
                    if !uac.is_terminal() && uac.state != crate::dialog::UacState::Terminating {
                        uac.send_bye().await?;
                    }
                }
            }
            Ok(())
        }
    }
}

pub async fn call_program_on_uac_event(
    meeting: &mut Meeting,
    _config: &CallProgramConfig,
    uac_call_id: &Option<String>,
    event: UacEventKind,
    _ctx: &ProgramContext,
) -> SipResult<()> {
    match event {
        UacEventKind::Ringing => {
            if meeting.uas.state == crate::dialog::UasState::Proceeding {
                meeting.uas.ringing().await?;
            }
            Ok(())
        }
        UacEventKind::Ready => {
            if let Some(call_id) = uac_call_id {
                if let Some(uac) = meeting.uac_mut(call_id) {
                    uac.send_ack().await?;
                }
            }
            if !matches!(
                meeting.uas.state,
                crate::dialog::UasState::Accepted | crate::dialog::UasState::Established
            ) {
                meeting.uas.accept().await?;
            }
            meeting.mixer.join(meeting.uas.media.clone());
            if let Some(call_id) = uac_call_id {
                let uac_media = meeting.uac_mut(call_id).map(|uac| uac.media.clone());
                if let Some(media) = uac_media {
                    meeting.mixer.join(media);
                }
            }
            Ok(())
        }
        UacEventKind::End => {
            if !meeting.uas.is_terminal() {
                meeting.uas.end().await?;
            }
            Ok(())
        }
    }
}

/// `RejectProgram`'s fixed contract: ring the caller, join its media to
/// the mixer, and optionally accept with hold music — never placing an
/// outgoing leg.
pub async fn reject_program_init(meeting: &mut Meeting, config: &RejectProgramConfig) -> SipResult<()> {
    meeting.uas.ringing().await?;
    meeting.mixer.join(meeting.uas.media.clone());

    if let Some(hold_media) = &config.hold_media {
        meeting.uas.accept().await?;
        meeting.uas.media.play(&[hold_media.clone()]);
    }

    Ok(())
}

/// Constructs a fresh in-memory media channel for a newly created
/// dialog leg. Kept as a free function so `server.rs` doesn't need to
/// know about the concrete `InMemoryMediaChannel` type.
pub fn new_media_channel() -> Arc<dyn MediaChannel> {
    Arc::new(InMemoryMediaChannel::new())
}
