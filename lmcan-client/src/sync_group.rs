//! Coordinated output updates across controllers
use lmcan_common::{
    api,
    traits::{BusError, CanSessionMux, SendPeriod},
};

use crate::bus::Bus;

/// Apply the pending outputs of every controller in the groups selected by `group_mask`
///
/// Outputs are held by a device when set with
/// [`MotorController::set_with_sync_group`](crate::MotorController::set_with_sync_group) and a
/// non-zero group. This broadcasts a single message; it holds no per-device state.
pub fn commit_sync_group<M: CanSessionMux>(bus: &Bus<M>, group_mask: u8) -> Result<(), BusError> {
    log::trace!("Committing sync group mask {group_mask:#04x}");
    bus.mux()
        .send_message(api::SYNC.raw(), &[group_mask], SendPeriod::NoRepeat)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use lmcan_common::traits::ReceivedMessage;

    use super::*;

    #[derive(Default)]
    struct RecordingMux {
        sent: Mutex<Vec<(u32, Vec<u8>, SendPeriod)>>,
    }

    impl CanSessionMux for RecordingMux {
        fn send_message(&self, id: u32, data: &[u8], period: SendPeriod) -> Result<(), BusError> {
            self.sent.lock().unwrap().push((id, data.to_vec(), period));
            Ok(())
        }

        fn receive_message(&self, _id: u32, _mask: u32) -> Result<Option<ReceivedMessage>, BusError> {
            Ok(None)
        }
    }

    #[test]
    fn test_commit_broadcasts_mask() {
        let bus = Bus::new(RecordingMux::default());
        commit_sync_group(&bus, 0x05).unwrap();
        let sent = bus.mux().sent.lock().unwrap();
        assert_eq!(1, sent.len());
        assert_eq!((0x180, vec![0x05], SendPeriod::NoRepeat), sent[0]);
    }
}
