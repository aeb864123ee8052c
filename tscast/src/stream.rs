//! Stream handles and their serializable records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tscast_net::{Datagram, DatagramSink, MuxStream};

use crate::source::FileSource;

/// UDP destination of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Destination IPv4 address.
    pub ip: String,
    /// Destination port.
    pub port: u16,
}

/// Public record of an active stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Assigned stream id; never reused within a process.
    pub id: u32,
    /// Source file path.
    pub source: String,
    /// Destination endpoint.
    pub endpoint: Endpoint,
}

/// Adapter pushing encapsulated datagrams into a muxer stream.
pub(crate) struct MuxSink(pub(crate) Arc<MuxStream>);

impl DatagramSink for MuxSink {
    fn push(&mut self, datagram: Datagram) {
        self.0.push(datagram);
    }

    fn flush(&mut self) {
        self.0.flush();
    }

    fn close(&mut self) {
        self.0.unblock();
    }
}

/// One active stream owned by the caster: its id, record, source worker and
/// muxer queue. The listener is held strongly here because the source only
/// keeps weak observer references.
pub(crate) struct StreamHandle {
    pub(crate) id: u32,
    pub(crate) info: StreamInfo,
    pub(crate) source: FileSource<MuxSink>,
    pub(crate) mux_stream: Arc<MuxStream>,
    pub(crate) _listener: Arc<dyn crate::source::SourceObserver>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_info_json_shape() {
        let info = StreamInfo {
            id: 3,
            source: "test.ts".into(),
            endpoint: Endpoint {
                ip: "127.0.0.1".into(),
                port: 50000,
            },
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["source"], "test.ts");
        assert_eq!(json["endpoint"]["ip"], "127.0.0.1");
        assert_eq!(json["endpoint"]["port"], 50000);
    }
}
