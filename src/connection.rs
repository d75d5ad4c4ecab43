use crate::log::{Log, Message};
use crate::transaction::Transaction;
use crate::util::ConnectionFlags;
use std::net::IpAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use time::OffsetDateTime;

/// Per-connection state shared by both parsing directions: the endpoints,
/// the ordered transaction list, open/close timestamps, raw byte
/// counters, and the log channel.
pub struct Connection {
    /// Client IP address.
    pub client_addr: Option<IpAddr>,
    /// Client port.
    pub client_port: Option<u16>,
    /// Server IP address.
    pub server_addr: Option<IpAddr>,
    /// Server port.
    pub server_port: Option<u16>,

    /// Transactions carried by this connection, in request-arrival order.
    /// Append-only while the connection lives.
    transactions: Vec<Transaction>,

    /// Messages recorded while parsing this connection.
    log_channel: (Sender<Message>, Receiver<Message>),

    /// Connection-level parsing flags (see `util::ConnectionFlags`).
    pub flags: u8,
    /// When the connection was opened, if the caller supplied timestamps.
    pub open_timestamp: Option<OffsetDateTime>,
    /// When the connection was closed.
    pub close_timestamp: Option<OffsetDateTime>,
    /// Inbound (request direction) byte counter.
    pub req_data_counter: u64,
    /// Outbound (response direction) byte counter.
    pub res_data_counter: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            client_addr: None,
            client_port: None,
            server_addr: None,
            server_port: None,
            transactions: Vec::new(),
            log_channel: channel(),
            flags: ConnectionFlags::UNKNOWN,
            open_timestamp: None,
            close_timestamp: None,
            req_data_counter: 0,
            res_data_counter: 0,
        }
    }
}

impl Connection {
    /// Records the connection endpoints and open time.
    pub fn open(
        &mut self,
        client_addr: Option<IpAddr>,
        client_port: Option<u16>,
        server_addr: Option<IpAddr>,
        server_port: Option<u16>,
        timestamp: Option<OffsetDateTime>,
    ) {
        self.client_addr = client_addr;
        self.client_port = client_port;
        self.server_addr = server_addr;
        self.server_port = server_port;
        if timestamp.is_some() {
            self.open_timestamp = timestamp;
        }
    }

    pub fn close(&mut self, timestamp: Option<OffsetDateTime>) {
        if timestamp.is_some() {
            self.close_timestamp = timestamp;
        }
    }

    /// Appends a transaction and returns its index.
    pub fn push_tx(&mut self, tx: Transaction) -> usize {
        self.transactions.push(tx);
        self.transactions.len() - 1
    }

    pub fn tx(&self, index: usize) -> Option<&Transaction> {
        self.transactions.get(index)
    }

    pub fn tx_mut(&mut self, index: usize) -> Option<&mut Transaction> {
        self.transactions.get_mut(index)
    }

    pub fn tx_size(&self) -> usize {
        self.transactions.len()
    }

    pub fn txs(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn track_req_data(&mut self, len: usize) {
        self.req_data_counter = self.req_data_counter.wrapping_add(len as u64);
    }

    pub fn track_res_data(&mut self, len: usize) {
        self.res_data_counter = self.res_data_counter.wrapping_add(len as u64);
    }

    /// Sender half of the log channel, for constructing `Logger`s.
    pub fn log_sender(&self) -> &Sender<Message> {
        &self.log_channel.0
    }

    /// Drains all messages recorded since the last call.
    pub fn get_logs(&self) -> Vec<Log> {
        let mut logs = Vec::new();
        while let Ok(message) = self.log_channel.1.try_recv() {
            logs.push(Log::new(self, message))
        }
        logs
    }

    /// Next recorded message, if any.
    pub fn get_next_log(&self) -> Option<Log> {
        self.log_channel
            .1
            .try_recv()
            .map(|message| Log::new(self, message))
            .ok()
    }
}

impl PartialEq for Connection {
    fn eq(&self, rhs: &Self) -> bool {
        self.client_addr == rhs.client_addr
            && self.client_port == rhs.client_port
            && self.server_addr == rhs.server_addr
            && self.server_port == rhs.server_port
    }
}
