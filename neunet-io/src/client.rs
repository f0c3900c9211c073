//! Network client for a NEUNET readout board.
//!
//! Registers are read and written over UDP; neutron data arrives on a TCP
//! stream once the board is staged.

use crate::stream::{PacketStreamSource, StreamConfig};
use crate::{Error, Result};
use log::{debug, info};
use neunet_proto::register::{self, Access, DEVICE_TIME};
use neunet_proto::{
    DetectorConfig, InstrumentTime, NeunetPacket, RegisterDump, RegisterRequest,
    RegisterResponse, ResolutionMode,
};
use std::io::BufReader;
use std::net::{Ipv4Addr, TcpStream, UdpSocket};

/// Largest register response datagram accepted.
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Board connection: a UDP socket for register access plus the settings
/// used to open the event stream.
pub struct NeunetClient {
    config: DetectorConfig,
    socket: UdpSocket,
    next_id: u8,
}

impl NeunetClient {
    /// Validates `config` and binds the register socket.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the socket cannot
    /// be bound.
    pub fn connect(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_read_timeout(Some(config.timeout()))?;
        debug!(
            "register socket {} -> {}",
            socket.local_addr()?,
            config.udp_endpoint()
        );
        Ok(Self {
            config,
            socket,
            next_id: 0,
        })
    }

    /// Detector configuration.
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Sends one register request and waits for the matching response.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on socket failure or timeout,
    /// [`Error::Proto`] for bus errors or short datagrams, and
    /// [`Error::UnexpectedResponse`] if the board echoes another request.
    pub fn register(&mut self, request: RegisterRequest) -> Result<RegisterResponse> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let request = request.with_id(id);

        self.socket
            .send_to(&request.encode(), self.config.udp_endpoint())?;
        let mut buf = [0u8; MAX_RESPONSE_LEN];
        let (len, _) = self.socket.recv_from(&mut buf)?;
        let response = RegisterResponse::decode(&buf[..len])?;

        if response.id() != id || response.address() != request.address {
            return Err(Error::UnexpectedResponse(format!(
                "sent id {id} for {:#x}, got id {} for {:#x}",
                request.address,
                response.id(),
                response.address()
            )));
        }
        if let Access::Read { len } = request.access {
            if response.data.len() < usize::from(len) {
                return Err(Error::UnexpectedResponse(format!(
                    "read of {:#x} returned {} of {len} bytes",
                    request.address,
                    response.data.len()
                )));
            }
        }
        Ok(response)
    }

    /// Reads `len` bytes from `address`.
    ///
    /// # Errors
    /// See [`NeunetClient::register`].
    pub fn read_register(&mut self, address: u32, len: u8) -> Result<Vec<u8>> {
        let mut response = self.register(RegisterRequest::read(address, len))?;
        response.data.truncate(usize::from(len));
        Ok(response.data)
    }

    /// Writes `data` to `address`.
    ///
    /// # Errors
    /// See [`NeunetClient::register`].
    pub fn write_register(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.register(RegisterRequest::write(address, data)?)?;
        Ok(())
    }

    /// Reads the board clock.
    ///
    /// # Errors
    /// See [`NeunetClient::register`].
    pub fn device_time(&mut self) -> Result<InstrumentTime> {
        let bytes = self.read_register(DEVICE_TIME, 5)?;
        Ok(InstrumentTime::from_bytes(&bytes)?)
    }

    /// Prepares the board for a run and sets its clock to now. Returns the
    /// time written.
    ///
    /// # Errors
    /// Returns [`Error::Unsupported`] if the configuration asks for 12-bit
    /// mode, which staging cannot select; otherwise see
    /// [`NeunetClient::register`].
    pub fn stage(&mut self) -> Result<InstrumentTime> {
        if self.config.resolution_mode != ResolutionMode::Bits14 {
            return Err(Error::Unsupported(format!(
                "staging selects 14-bit mode, configuration asks for {}",
                self.config.resolution_mode
            )));
        }
        let now = InstrumentTime::now()?;
        for request in register::staging_sequence(now)? {
            self.register(request)?;
        }
        info!("staged detector at {} (device time {now})", self.config.address);
        Ok(now)
    }

    /// Returns the board to handshake mode.
    ///
    /// # Errors
    /// See [`NeunetClient::register`].
    pub fn unstage(&mut self) -> Result<()> {
        for request in register::unstage_sequence()? {
            self.register(request)?;
        }
        info!("unstaged detector at {}", self.config.address);
        Ok(())
    }

    /// Reads the whole register block.
    ///
    /// # Errors
    /// See [`NeunetClient::register`].
    pub fn read_full_register(&mut self) -> Result<RegisterDump> {
        let mut dump = RegisterDump::default();
        for request in register::dump_requests() {
            let address = request.address;
            let response = self.register(request)?;
            dump.rows.push((address, response.data));
        }
        Ok(dump)
    }

    /// Connects to the event stream, keeping only the configured PSDs.
    ///
    /// # Errors
    /// Returns an error if the connection fails within the timeout.
    pub fn open_stream(&self) -> Result<PacketStreamSource<BufReader<TcpStream>>> {
        let config = StreamConfig::new()
            .with_resolution_mode(self.config.resolution_mode)
            .with_channels(self.config.psd_numbers.clone());
        self.open_stream_with(config)
    }

    /// Connects to the event stream with explicit stream options.
    ///
    /// # Errors
    /// Returns an error if the connection fails within the timeout.
    pub fn open_stream_with(
        &self,
        config: StreamConfig,
    ) -> Result<PacketStreamSource<BufReader<TcpStream>>> {
        let endpoint = self.config.tcp_endpoint();
        let stream = TcpStream::connect_timeout(&endpoint, self.config.timeout())?;
        stream.set_read_timeout(Some(self.config.timeout()))?;
        info!("connected to event stream at {endpoint}");
        Ok(PacketStreamSource::new(BufReader::new(stream), config))
    }

    /// Reads up to `count` packets from the event stream, of any type.
    ///
    /// # Errors
    /// Returns an error if the connection or a read fails.
    pub fn inspect(&self, count: usize) -> Result<Vec<NeunetPacket>> {
        let mode = self.config.resolution_mode;
        let mut source = self.open_stream_with(StreamConfig::new().with_resolution_mode(mode))?;
        let mut packets = Vec::with_capacity(count);
        while packets.len() < count {
            match source.next_packet()? {
                Some(raw) => packets.push(NeunetPacket::parse(&raw, mode)),
                None => break,
            }
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neunet_proto::register::{HANDSHAKE, READ_MODE, REGISTER_DUMP};
    use std::net::SocketAddr;
    use std::sync::mpsc;
    use std::thread;

    // Fake board answering `replies` datagrams. Reads return bytes counting
    // up from the low address byte; `bus_error` flags every response.
    fn fake_board(replies: usize, bus_error: bool) -> (SocketAddr, mpsc::Receiver<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            for _ in 0..replies {
                let (len, peer) = socket.recv_from(&mut buf).unwrap();
                let request = buf[..len].to_vec();
                let mut response = request[..8].to_vec();
                response[1] = if bus_error { 0x09 } else { 0x08 };
                if request[1] == READ_MODE {
                    let start = request[7];
                    response.extend((0..request[3]).map(|i| start.wrapping_add(i)));
                } else {
                    response.extend_from_slice(&request[8..]);
                }
                socket.send_to(&response, peer).unwrap();
                tx.send(request).unwrap();
            }
        });
        (addr, rx)
    }

    fn client_for(addr: SocketAddr) -> NeunetClient {
        let mut config = DetectorConfig::default()
            .with_address(addr.ip())
            .with_timeout_secs(2.0);
        config.udp_port = addr.port();
        NeunetClient::connect(config).unwrap()
    }

    #[test]
    fn test_read_register() {
        let (addr, requests) = fake_board(1, false);
        let mut client = client_for(addr);
        let data = client.read_register(0x180, 4).unwrap();
        assert_eq!(data, vec![0x80, 0x81, 0x82, 0x83]);
        let sent = requests.recv().unwrap();
        assert_eq!(sent, vec![0xFF, 0xC0, 0, 4, 0x00, 0x00, 0x01, 0x80]);
    }

    #[test]
    fn test_stage_and_unstage_sequence() {
        let (addr, requests) = fake_board(5, false);
        let mut client = client_for(addr);
        client.stage().unwrap();
        client.unstage().unwrap();

        let sent: Vec<Vec<u8>> = requests.iter().take(5).collect();
        let ids: Vec<u8> = sent.iter().map(|r| r[2]).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(&sent[3][4..], &[0x00, 0x00, 0x01, 0xB4, 0x8A, 0x80]);
        assert_eq!(&sent[4][4..], &[0x00, 0x00, 0x01, 0xB5, 0x00]);
        assert_eq!(
            u32::from_be_bytes([sent[4][4], sent[4][5], sent[4][6], sent[4][7]]),
            HANDSHAKE
        );
    }

    #[test]
    fn test_stage_rejects_twelve_bit() {
        let mut config = DetectorConfig::default()
            .with_resolution_mode(ResolutionMode::Bits12)
            .with_timeout_secs(0.1);
        config.address = Ipv4Addr::LOCALHOST.into();
        let mut client = NeunetClient::connect(config).unwrap();
        assert!(matches!(client.stage(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_full_register_dump() {
        let (addr, _requests) = fake_board(REGISTER_DUMP.len(), false);
        let mut client = client_for(addr);
        let dump = client.read_full_register().unwrap();
        assert_eq!(dump.rows.len(), REGISTER_DUMP.len());
        assert_eq!(dump.rows[0], (0x180, (0x80..0x88).collect::<Vec<u8>>()));
        let text = dump.to_string();
        assert!(text.contains("0x188 = 88:89:8a"), "{text}");
    }

    #[test]
    fn test_bus_error() {
        let (addr, _requests) = fake_board(1, true);
        let mut client = client_for(addr);
        let err = client.write_register(HANDSHAKE, &[0]).unwrap_err();
        assert!(matches!(
            err,
            Error::Proto(neunet_proto::Error::BusError(_))
        ));
    }

    #[test]
    fn test_device_time() {
        let (addr, _requests) = fake_board(1, false);
        let mut client = client_for(addr);
        // Bytes 0x90..=0x94 from the fake board.
        let time = client.device_time().unwrap();
        assert_eq!(time, InstrumentTime::new(0x9091_9293, 0x94));
    }
}
