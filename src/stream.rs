//! Decoding the autonomous read stream and dispatching it to listeners.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};

use crate::error::{Error, Result, ResponseStatus};
use crate::gen2::Bank;
use crate::protocol::{read_frame, Opcode, Response};
use crate::read_plan::SearchFlags;
use crate::stats::ReaderStats;
use crate::tag::TagReadData;
use crate::transport::{Transport, TransportListener};

const KIND_TAG: u8 = 0x01;
const KIND_STATS: u8 = 0x02;

/// One message of the autonomous stream.
#[derive(Clone, PartialEq, Debug)]
pub enum StreamEvent {
    Tag(TagReadData),
    Stats(ReaderStats),
    /// End of a search cycle with nothing to report
    Heartbeat,
}

impl StreamEvent {
    /// Decode a streamed response: option, search flags, then a kind byte
    /// and its payload. A response without a kind byte ends a cycle.
    pub fn decode(response: &Response, base_timestamp: u64, bank: Option<Bank>) -> Result<StreamEvent> {
        if response.opcode != u8::from(Opcode::ReadTagIdMultiple) {
            return Err(Error::Parse(format!("Unexpected opcode {:#04x} in read stream", response.opcode)));
        }
        match response.status() {
            ResponseStatus::Success => {}
            ResponseStatus::NoTagsFound => return Ok(StreamEvent::Heartbeat),
            status => return Err(Error::from(status)),
        }
        let data = &response.data;
        if data.len() < 3 {
            return Err(Error::Parse(format!("Stream response of {} bytes", data.len())));
        }
        let flags = SearchFlags::from_bits_truncate(((data[1] as u16) << 8) | data[2] as u16);
        if data.len() == 3 {
            return Ok(StreamEvent::Heartbeat);
        }
        match data[3] {
            KIND_TAG => Ok(StreamEvent::Tag(TagReadData::parse(&data[4..], base_timestamp, bank)?)),
            KIND_STATS if flags.contains(SearchFlags::STATS_REPORT) => {
                Ok(StreamEvent::Stats(ReaderStats::parse(&data[4..])?))
            }
            kind => Err(Error::Parse(format!("Unknown stream record kind {:#04x}", kind))),
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Handle returned when a listener is added, used to remove it again.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct ListenerId(usize);

pub type ReadListener = Arc<dyn Fn(&TagReadData) + Send + Sync>;
pub type StatsListener = Arc<dyn Fn(&ReaderStats) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: usize,
    reads: Vec<(ListenerId, ReadListener)>,
    stats: Vec<(ListenerId, StatsListener)>,
    transport: Vec<(ListenerId, Box<dyn TransportListener>)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub fn add_read(&mut self, listener: ReadListener) -> ListenerId {
        let id = self.next_id();
        self.reads.push((id, listener));
        id
    }

    pub fn add_stats(&mut self, listener: StatsListener) -> ListenerId {
        let id = self.next_id();
        self.stats.push((id, listener));
        id
    }

    pub fn add_transport(&mut self, listener: Box<dyn TransportListener>) -> ListenerId {
        let id = self.next_id();
        self.transport.push((id, listener));
        id
    }

    fn remove<L>(list: &mut Vec<(ListenerId, L)>, id: ListenerId, what: &str) -> Result<()> {
        match list.iter().position(|(i, _)| *i == id) {
            Some(pos) => {
                list.remove(pos);
                Ok(())
            }
            None => Err(Error::Program(format!("No {} listener with id {:?}", what, id))),
        }
    }

    pub fn remove_read(&mut self, id: ListenerId) -> Result<()> {
        Listeners::remove(&mut self.reads, id, "read")
    }

    pub fn remove_stats(&mut self, id: ListenerId) -> Result<()> {
        Listeners::remove(&mut self.stats, id, "stats")
    }

    pub fn remove_transport(&mut self, id: ListenerId) -> Result<()> {
        Listeners::remove(&mut self.transport, id, "transport")
    }

    pub fn notify_transport(&mut self, tx: bool, data: &[u8], timeout: Duration) {
        for (_, l) in self.transport.iter_mut() {
            l.on_transport(tx, data, timeout);
        }
    }

    /// Hand an event to its listeners. A listener that panics is logged and
    /// the rest still run, so the stream thread and its port survive.
    fn dispatch(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Tag(read) => {
                for (id, l) in &self.reads {
                    guarded("read", *id, || l(read));
                }
            }
            StreamEvent::Stats(stats) => {
                for (id, l) in &self.stats {
                    guarded("stats", *id, || l(stats));
                }
            }
            StreamEvent::Heartbeat => {}
        }
    }
}

fn guarded<F: FnOnce()>(what: &str, id: ListenerId, call: F) {
    if panic::catch_unwind(AssertUnwindSafe(call)).is_err() {
        error!("{} listener {:?} panicked", what, id);
    }
}

pub(crate) type SharedListeners = Arc<Mutex<Listeners>>;

pub(crate) fn lock(listeners: &SharedListeners) -> MutexGuard<Listeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_timeout(e: &Error) -> bool {
    match e {
        Error::Io(e) => e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock,
        _ => false,
    }
}

/// Receive and decode the next stream message. `None` when the port timed
/// out before a frame arrived.
pub(crate) fn receive_event<T: Transport>(
    port: &mut T,
    listeners: &SharedListeners,
    timeout: Duration,
    base_timestamp: u64,
    bank: Option<Bank>,
) -> Result<Option<StreamEvent>> {
    let frame = match read_frame(port) {
        Ok(frame) => frame,
        Err(ref e) if is_timeout(e) => return Ok(None),
        Err(e) => return Err(e),
    };
    debug!("Receive: {:02X?}", frame);
    lock(listeners).notify_transport(false, &frame, timeout);
    let response = Response::from_bytes(&frame)?;
    StreamEvent::decode(&response, base_timestamp, bank).map(Some)
}

/// A thread decoding the stream until told to stop; it hands the port back
/// when joined.
pub(crate) struct Background<T> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<T>,
}

impl<T: Transport> Background<T> {
    pub fn spawn(
        mut port: T,
        listeners: SharedListeners,
        timeout: Duration,
        bank: Option<Bank>,
    ) -> Result<Background<T>> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let base_timestamp = now_millis();
        let handle = std::thread::Builder::new()
            .name("autonomous-read".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    match receive_event(&mut port, &listeners, timeout, base_timestamp, bank) {
                        Ok(Some(event)) => lock(&listeners).dispatch(&event),
                        Ok(None) => {}
                        Err(Error::Io(e)) => {
                            error!("Autonomous read stopped: {}", e);
                            break;
                        }
                        Err(e) => warn!("Dropped stream message: {}", e),
                    }
                }
                port
            })?;
        Ok(Background { stop, handle })
    }

    /// True once the thread has given up on the port.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<T> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .join()
            .map_err(|_| Error::Program("Autonomous read thread panicked".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::MetadataFlags;
    use crate::transport::mock::{response, MockTransport};
    use std::sync::mpsc;

    fn tag_record() -> Vec<u8> {
        let mut data = vec![0x10, 0x10, 0x05, KIND_TAG];
        data.extend_from_slice(&(MetadataFlags::ANTENNAID | MetadataFlags::DATA).bits().to_be_bytes());
        data.push(1);
        data.extend_from_slice(&[0x00, 0x10, 0xE2, 0x80]);
        data.extend_from_slice(&[0x00, 0x30, 0x20, 0x00, 0xAB, 0xCD, 0x12, 0x34]);
        data
    }

    fn decode(frame: &[u8]) -> Result<StreamEvent> {
        StreamEvent::decode(&Response::from_bytes(frame).unwrap(), 0, Some(Bank::Tid))
    }

    #[test]
    fn test_decode_tag() {
        match decode(&response(0x22, 0, &tag_record())).unwrap() {
            StreamEvent::Tag(read) => {
                assert_eq!(read.antenna, 1);
                assert_eq!(read.tag.epc, vec![0xAB, 0xCD]);
                assert_eq!(read.tid_mem_data, vec![0xE2, 0x80]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_heartbeats() {
        assert_eq!(decode(&response(0x22, 0, &[0x10, 0x10, 0x05])).unwrap(), StreamEvent::Heartbeat);
        assert_eq!(decode(&response(0x22, 0x0400, &[])).unwrap(), StreamEvent::Heartbeat);
    }

    #[test]
    fn test_decode_stats() {
        let frame = response(0x22, 0, &[0x10, 0x11, 0x05, KIND_STATS, 0x00, 0x10, 0x10, 0x01, 0x1F]);
        match decode(&frame).unwrap() {
            StreamEvent::Stats(stats) => assert_eq!(stats.temperature, 31),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_errors() {
        match decode(&response(0x22, 0x0504, &[])) {
            Err(Error::Communication(ResponseStatus::TemperatureExceedLimits)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode(&response(0x97, 0, &[0x0E])).is_err());
        assert!(decode(&response(0x22, 0, &[0x10, 0x10, 0x05, 0x09])).is_err());
    }

    #[test]
    fn test_listener_ids() {
        let mut listeners = Listeners::default();
        let a = listeners.add_read(Arc::new(|_| {}));
        let b = listeners.add_read(Arc::new(|_| {}));
        assert_ne!(a, b);
        assert!(listeners.remove_read(a).is_ok());
        assert!(listeners.remove_read(a).is_err());
        assert!(listeners.remove_stats(b).is_err());
    }

    #[test]
    fn test_background_dispatch() {
        let port = MockTransport::default();
        port.push(&response(0x22, 0, &[0x10, 0x10, 0x05]));
        port.push(&[0x00, 0x00]); // line noise
        port.push(&response(0x22, 0, &tag_record()));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listeners: SharedListeners = Arc::new(Mutex::new(Listeners::default()));
        lock(&listeners).add_read(Arc::new(move |read: &TagReadData| {
            tx.lock().unwrap().send(read.tag.epc.clone()).unwrap();
        }));

        let bg = Background::spawn(port.clone(), listeners, Duration::from_millis(10), None).unwrap();
        let epc = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(epc, vec![0xAB, 0xCD]);
        let port = bg.join().unwrap();
        assert!(port.incoming.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_listener_keeps_stream_alive() {
        let port = MockTransport::default();
        port.push(&response(0x22, 0, &tag_record()));
        port.push(&response(0x22, 0, &tag_record()));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listeners: SharedListeners = Arc::new(Mutex::new(Listeners::default()));
        lock(&listeners).add_read(Arc::new(|_: &TagReadData| panic!("listener bug")));
        lock(&listeners).add_read(Arc::new(move |read: &TagReadData| {
            tx.lock().unwrap().send(read.antenna).unwrap();
        }));

        let bg = Background::spawn(port.clone(), listeners.clone(), Duration::from_millis(10), None).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(!bg.is_finished());
        assert!(!listeners.is_poisoned());
        assert!(bg.join().is_ok());
    }
}
