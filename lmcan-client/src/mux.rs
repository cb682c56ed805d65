//! A [`CanSessionMux`] built on an async CAN interface
//!
//! Two tokio tasks own the interface. The receive task keeps the latest frame seen for every
//! extended identifier; sessions consume frames from that cache without blocking. The transmit
//! task sends one-shot frames and repeats periodic ones until they are cancelled.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use lmcan_common::{
    api::{FULL_MESSAGE_MASK, REMOTE_FRAME},
    messages::MAX_DATA_LENGTH,
    traits::{
        AsyncCanReceiver, AsyncCanSender, BusError, CanSessionMux, ReceivedMessage, SendPeriod,
    },
    CanId, CanMessage,
};
use tokio::{
    sync::mpsc::{channel, error::TrySendError, Receiver, Sender},
    task::JoinHandle,
    time::Instant,
};

/// Depth of the queue between sessions and the transmit task
pub const TX_QUEUE_DEPTH: usize = 100;

const RX_ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
enum TxCommand {
    Once(CanMessage),
    Periodic { msg: CanMessage, period: Duration },
    Cancel(u32),
}

#[derive(Debug, Clone, Copy)]
struct PeriodicMessage {
    msg: CanMessage,
    period: Duration,
    next_due: Instant,
}

type FrameCache = Arc<Mutex<HashMap<u32, ReceivedMessage>>>;

/// Shares one CAN interface among motor controller sessions
///
/// Must be created from within a tokio runtime. The background tasks are stopped when the mux is
/// dropped.
#[derive(Debug)]
pub struct MessageMux {
    cache: FrameCache,
    commands: Sender<TxCommand>,
    rx_task: JoinHandle<()>,
    tx_task: JoinHandle<()>,
}

impl MessageMux {
    /// Create a mux, taking ownership of the sender and receiver
    pub fn new<S, R>(sender: S, receiver: R) -> Self
    where
        S: AsyncCanSender + 'static,
        R: AsyncCanReceiver + 'static,
    {
        let cache = FrameCache::default();
        let (commands, command_rx) = channel(TX_QUEUE_DEPTH);
        let rx_task = tokio::spawn(run_receiver(receiver, cache.clone(), Instant::now()));
        let tx_task = tokio::spawn(run_transmitter(sender, command_rx));
        Self {
            cache,
            commands,
            rx_task,
            tx_task,
        }
    }

    /// Number of identifiers with an unread frame
    pub fn pending(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for MessageMux {
    fn drop(&mut self) {
        self.rx_task.abort();
        self.tx_task.abort();
    }
}

impl CanSessionMux for MessageMux {
    fn send_message(&self, id: u32, data: &[u8], period: SendPeriod) -> Result<(), BusError> {
        if data.len() > MAX_DATA_LENGTH {
            return Err(BusError::PayloadTooLarge { len: data.len() });
        }
        let wire_id = id & FULL_MESSAGE_MASK;
        let msg = if id & REMOTE_FRAME != 0 {
            CanMessage::new_rtr(CanId::extended(wire_id))
        } else {
            CanMessage::new(CanId::extended(wire_id), data)
        };

        let command = match period {
            SendPeriod::NoRepeat => TxCommand::Once(msg),
            SendPeriod::StopRepeating => TxCommand::Cancel(wire_id),
            SendPeriod::Every(ms) => TxCommand::Periodic {
                msg,
                period: Duration::from_millis(ms.max(1) as u64),
            },
        };

        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => {
                log::warn!("Dropped message {wire_id:#010x}: transmit queue full");
                BusError::TxQueueFull
            }
            TrySendError::Closed(_) => BusError::Closed,
        })
    }

    fn receive_message(&self, id: u32, mask: u32) -> Result<Option<ReceivedMessage>, BusError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if mask & FULL_MESSAGE_MASK == FULL_MESSAGE_MASK {
            return Ok(cache.remove(&(id & FULL_MESSAGE_MASK)));
        }
        let latest = cache
            .values()
            .filter(|msg| msg.id & mask == id & mask)
            .max_by_key(|msg| msg.timestamp_ms)
            .map(|msg| msg.id);
        Ok(latest.and_then(|key| cache.remove(&key)))
    }
}

async fn run_receiver<R: AsyncCanReceiver>(mut receiver: R, cache: FrameCache, epoch: Instant) {
    loop {
        match receiver.recv().await {
            Ok(msg) => {
                // Requests from other hosts and standard frames are not motor controller traffic
                let CanId::Extended(id) = msg.id() else {
                    continue;
                };
                if msg.is_rtr() {
                    continue;
                }
                let timestamp_ms = epoch.elapsed().as_millis() as u64;
                let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
                cache.insert(id, ReceivedMessage::new(id, msg.data(), timestamp_ms));
            }
            Err(e) => {
                log::warn!("CAN receive error: {e}");
                tokio::time::sleep(RX_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn transmit<S: AsyncCanSender>(sender: &mut S, msg: CanMessage) {
    if let Err(e) = sender.send(msg).await {
        log::warn!("{e}");
    }
}

async fn run_transmitter<S: AsyncCanSender>(mut sender: S, mut commands: Receiver<TxCommand>) {
    let mut periodic: HashMap<u32, PeriodicMessage> = HashMap::new();
    loop {
        let next_due = periodic.values().map(|p| p.next_due).min();
        let wait = async move {
            match next_due {
                Some(due) => tokio::time::sleep_until(due).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                match command {
                    TxCommand::Once(msg) => transmit(&mut sender, msg).await,
                    TxCommand::Periodic { msg, period } => {
                        transmit(&mut sender, msg).await;
                        periodic.insert(
                            msg.id().raw(),
                            PeriodicMessage {
                                msg,
                                period,
                                next_due: Instant::now() + period,
                            },
                        );
                    }
                    TxCommand::Cancel(id) => {
                        periodic.remove(&id);
                    }
                }
            }
            _ = wait => {
                let now = Instant::now();
                for p in periodic.values_mut().filter(|p| p.next_due <= now) {
                    transmit(&mut sender, p.msg).await;
                    p.next_due += p.period;
                    if p.next_due <= now {
                        p.next_due = now + p.period;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use lmcan_common::traits::CanSendError;

    use super::*;

    struct ChannelSender(mpsc::Sender<CanMessage>);

    impl AsyncCanSender for ChannelSender {
        async fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
            self.0.send(msg).await.map_err(|_| CanSendError(msg))
        }
    }

    struct ChannelReceiver(mpsc::Receiver<CanMessage>);

    impl AsyncCanReceiver for ChannelReceiver {
        type Error = BusError;

        fn try_recv(&mut self) -> Result<Option<CanMessage>, BusError> {
            Ok(self.0.try_recv().ok())
        }

        async fn recv(&mut self) -> Result<CanMessage, BusError> {
            self.0.recv().await.ok_or(BusError::Closed)
        }
    }

    fn setup() -> (
        MessageMux,
        mpsc::Receiver<CanMessage>,
        mpsc::Sender<CanMessage>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let mux = MessageMux::new(ChannelSender(out_tx), ChannelReceiver(in_rx));
        (mux, out_rx, in_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_once_and_remote() {
        let (mux, mut out, _in) = setup();
        mux.send_message(0x0202_0145, &[1, 2], SendPeriod::NoRepeat)
            .unwrap();
        mux.send_message(0x8000_0205, &[], SendPeriod::NoRepeat)
            .unwrap();

        let msg = out.recv().await.unwrap();
        assert_eq!(CanId::extended(0x0202_0145), msg.id());
        assert_eq!(&[1, 2], msg.data());
        let msg = out.recv().await.unwrap();
        assert_eq!(CanId::extended(0x205), msg.id());
        assert!(msg.is_rtr());

        assert_eq!(
            Err(BusError::PayloadTooLarge { len: 9 }),
            mux.send_message(0x100, &[0; 9], SendPeriod::NoRepeat)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_cancel() {
        let (mux, mut out, _in) = setup();
        mux.send_message(0x0202_1605, &[], SendPeriod::Every(20))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;

        let mut count = 0;
        while let Ok(msg) = out.try_recv() {
            assert_eq!(CanId::extended(0x0202_1605), msg.id());
            count += 1;
        }
        assert!(count >= 3, "only {count} repeats");

        mux.send_message(0x0202_1605, &[], SendPeriod::StopRepeating)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        while out.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_latest_once() {
        let (mux, _out, input) = setup();
        input
            .send(CanMessage::new(CanId::extended(0x0202_1405), &[1]))
            .await
            .unwrap();
        input
            .send(CanMessage::new(CanId::extended(0x0202_1405), &[2]))
            .await
            .unwrap();
        input
            .send(CanMessage::new(CanId::std(0x105), &[3]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(1, mux.pending());
        assert_eq!(
            None,
            mux.receive_message(0x0202_1406, FULL_MESSAGE_MASK).unwrap()
        );
        let msg = mux
            .receive_message(0x0202_1405, FULL_MESSAGE_MASK)
            .unwrap()
            .unwrap();
        assert_eq!(&[2], msg.data());
        assert_eq!(
            None,
            mux.receive_message(0x0202_1405, FULL_MESSAGE_MASK).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_with_mask() {
        let (mux, _out, input) = setup();
        input
            .send(CanMessage::new(CanId::extended(0x0202_1407), &[7]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Match on the API bits only, ignoring the device number
        let msg = mux
            .receive_message(0x0202_1400, 0x1fff_ffc0)
            .unwrap()
            .unwrap();
        assert_eq!(0x0202_1407, msg.id);
        assert_eq!(0, mux.pending());
    }
}
