//! A Meeting bridges one inbound (UAS) leg to zero or more outbound
//! (UAC) legs through a shared media mixer.
//!
//! A Meeting owns its dialogs by value rather than holding a reference
//! back to the Scenario driving it — the dispatcher passes `&mut
//! Meeting` into whichever program is active, so there is no ownership
//! cycle between Meeting and Scenario to manage.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::dialog::{Uac, Uas};
use crate::media::Mixer;

pub struct Meeting {
    pub id: Uuid,
    pub uas: Uas,
    pub uac_pool: HashMap<String, Uac>,
    pub mixer: Arc<dyn Mixer>,
}

impl Meeting {
    pub fn new(uas: Uas, mixer: Arc<dyn Mixer>) -> Self {
        Meeting {
            id: Uuid::new_v4(),
            uas,
            uac_pool: HashMap::new(),
            mixer,
        }
    }

    pub fn append_uac(&mut self, uac: Uac) {
        self.uac_pool.insert(uac.call_id.clone(), uac);
    }

    pub fn uac_mut(&mut self, call_id: &str) -> Option<&mut Uac> {
        self.uac_pool.get_mut(call_id)
    }

    /// The single UAC leg this meeting currently bridges to, if any.
    /// `CallProgram` only ever places one outgoing leg at a time, so
    /// this is the common accessor its handlers use.
    pub fn sole_uac_mut(&mut self) -> Option<&mut Uac> {
        self.uac_pool.values_mut().next()
    }
}
