//! Integration tests: real publishers and players against a running relay.
//!
//! Every test starts its own server on ephemeral loopback ports and drives
//! it with plain TCP/UDP sockets.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use relay::{Registry, Server, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(2);

fn start_server(protocols: &[&str]) -> Server {
    let registry = Registry::configure(ServerConfig {
        protocols: protocols.iter().map(|p| p.to_string()).collect(),
        bind_host: "127.0.0.1".to_string(),
        control_port: 0,
        rtp_port: 0,
        rtcp_port: 0,
        ..ServerConfig::default()
    })
    .expect("valid config");
    let mut server = Server::new(registry);
    server.start().expect("server start");
    server
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    cseq: u32,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect_timeout(&addr, TIMEOUT).expect("connect to server");
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream.set_write_timeout(Some(TIMEOUT)).unwrap();
        let writer = stream.try_clone().unwrap();
        Client {
            reader: BufReader::new(stream),
            writer,
            cseq: 0,
        }
    }

    fn request(&mut self, method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> String {
        self.cseq += 1;
        let mut raw = format!("{method} {uri} RTSP/1.0\r\nCSeq: {}\r\n", self.cseq);
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        raw.push_str("\r\n");
        raw.push_str(body);
        self.writer.write_all(raw.as_bytes()).unwrap();
        self.read_response()
    }

    fn read_response(&mut self) -> String {
        let mut response = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            response.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }

        if let Some(len) = header(&response, "content-length").and_then(|v| v.parse::<usize>().ok())
        {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body).unwrap();
            response.push_str(&String::from_utf8_lossy(&body));
        }
        response
    }

    fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let mut head = [0u8; 4];
        self.reader.read_exact(&mut head).unwrap();
        assert_eq!(head[0], b'$', "expected interleaved frame");
        let len = u16::from_be_bytes([head[2], head[3]]) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).unwrap();
        (head[1], payload)
    }

    fn write_frame(&mut self, channel: u8, payload: &[u8]) {
        let mut frame = vec![b'$', channel];
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        self.writer.write_all(&frame).unwrap();
    }
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response
        .lines()
        .find_map(|l| {
            let (n, v) = l.split_once(':')?;
            n.eq_ignore_ascii_case(name).then_some(v.trim())
        })
}

/// Poll `condition` until it holds or `TIMEOUT` elapses.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn status(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=cam\r\nm=video 0 RTP/AVP 96\r\n";

#[test]
fn interleaved_publisher_reaches_interleaved_player() {
    let server = start_server(&["tcp"]);
    let addr = server.control_addr().unwrap();
    let base = format!("rtsp://{addr}/cam1");

    let mut publisher = Client::connect(addr);
    let resp = publisher.request("ANNOUNCE", &base, &[("Content-Type", "application/sdp")], SDP);
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "ANNOUNCE: {}", status(&resp));

    let resp = publisher.request(
        "SETUP",
        &format!("{base}/trackID=0"),
        &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record")],
        "",
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", status(&resp));
    assert!(header(&resp, "transport").unwrap().contains("interleaved=0-1"));
    let session = header(&resp, "session").unwrap().to_string();
    assert_eq!(session.len(), 16);

    let resp = publisher.request("RECORD", &base, &[("Session", &session)], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "RECORD: {}", status(&resp));

    let mut player = Client::connect(addr);
    let resp = player.request("DESCRIBE", &base, &[("Accept", "application/sdp")], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "DESCRIBE: {}", status(&resp));
    assert!(resp.ends_with(SDP));

    let resp = player.request(
        "SETUP",
        &format!("{base}/trackID=0"),
        &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
        "",
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", status(&resp));
    let player_session = header(&resp, "session").unwrap().to_string();
    assert_ne!(player_session, session);

    let resp = player.request("PLAY", &base, &[("Session", &player_session)], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {}", status(&resp));

    publisher.write_frame(0, &[0x01, 0x02, 0x03]);
    assert_eq!(player.read_frame(), (0, vec![0x01, 0x02, 0x03]));

    publisher.write_frame(1, &[0xAA]);
    assert_eq!(player.read_frame(), (1, vec![0xAA]));
}

#[test]
fn datagram_publisher_reaches_datagram_player() {
    let server = start_server(&["udp"]);
    let addr = server.control_addr().unwrap();
    let (server_rtp, server_rtcp) = server.datagram_addrs().unwrap();
    let base = format!("rtsp://{addr}/cam2");

    let pub_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let pub_rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let play_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let play_rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
    play_rtp.set_read_timeout(Some(TIMEOUT)).unwrap();
    play_rtcp.set_read_timeout(Some(TIMEOUT)).unwrap();

    let mut publisher = Client::connect(addr);
    let transport = format!(
        "RTP/AVP;unicast;client_port={}-{};mode=record",
        pub_rtp.local_addr().unwrap().port(),
        pub_rtcp.local_addr().unwrap().port()
    );
    let resp = publisher.request("SETUP", &base, &[("Transport", &transport)], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", status(&resp));
    let expected = format!("server_port={}-{}", server_rtp.port(), server_rtcp.port());
    assert!(header(&resp, "transport").unwrap().contains(&expected));
    let resp = publisher.request("RECORD", &base, &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "RECORD: {}", status(&resp));

    let mut player = Client::connect(addr);
    let transport = format!(
        "RTP/AVP;unicast;client_port={}-{}",
        play_rtp.local_addr().unwrap().port(),
        play_rtcp.local_addr().unwrap().port()
    );
    let resp = player.request("SETUP", &base, &[("Transport", &transport)], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", status(&resp));
    let resp = player.request("PLAY", &base, &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {}", status(&resp));

    let mut buf = [0u8; 64];

    pub_rtp.send_to(&[0x80, 0x60, 0x00, 0x01], server_rtp).unwrap();
    let (n, from) = play_rtp.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[0x80, 0x60, 0x00, 0x01]);
    assert_eq!(from, server_rtp);

    pub_rtcp.send_to(&[0x81, 0xC8], server_rtcp).unwrap();
    let (n, from) = play_rtcp.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[0x81, 0xC8]);
    assert_eq!(from, server_rtcp);

    // Datagrams well past a typical MTU arrive whole.
    let large: Vec<u8> = (0..4000u32).map(|i| i as u8).collect();
    pub_rtp.send_to(&large, server_rtp).unwrap();
    let mut big = vec![0u8; 65_535];
    let (n, _) = play_rtp.recv_from(&mut big).unwrap();
    assert_eq!(&big[..n], &large[..]);
}

/// Publisher and player over UDP on `path`; returns the publisher's RTP
/// socket, the player's RTP socket and the control clients.
fn udp_pair(server: &Server, path: &str) -> (UdpSocket, UdpSocket, Client, Client) {
    let addr = server.control_addr().unwrap();
    let uri = format!("rtsp://{addr}/{path}");

    let pub_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let play_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    play_rtp.set_read_timeout(Some(TIMEOUT)).unwrap();

    let mut publisher = Client::connect(addr);
    let transport = format!(
        "RTP/AVP;unicast;client_port={}-{};mode=record",
        pub_rtp.local_addr().unwrap().port(),
        pub_rtp.local_addr().unwrap().port() + 1
    );
    let resp = publisher.request("SETUP", &uri, &[("Transport", &transport)], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", status(&resp));
    let resp = publisher.request("RECORD", &uri, &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "RECORD: {}", status(&resp));

    let mut player = Client::connect(addr);
    let transport = format!(
        "RTP/AVP;unicast;client_port={}-{}",
        play_rtp.local_addr().unwrap().port(),
        play_rtp.local_addr().unwrap().port() + 1
    );
    let resp = player.request("SETUP", &uri, &[("Transport", &transport)], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", status(&resp));
    let resp = player.request("PLAY", &uri, &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {}", status(&resp));

    (pub_rtp, play_rtp, publisher, player)
}

#[test]
fn datagram_from_unknown_source_is_not_relayed() {
    let server = start_server(&["udp"]);
    let (server_rtp, _) = server.datagram_addrs().unwrap();
    let (pub_rtp, play_rtp, _publisher, _player) = udp_pair(&server, "cam6");

    let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
    stranger.send_to(b"intruder", server_rtp).unwrap();
    pub_rtp.send_to(b"genuine", server_rtp).unwrap();

    // The receive loop handles datagrams in order, so a relayed stranger
    // packet would arrive first.
    let mut buf = [0u8; 64];
    let (n, _) = play_rtp.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"genuine");
}

#[test]
fn connection_loss_unregisters_sessions() {
    let server = start_server(&["udp"]);
    let registry = server.registry().clone();
    let (_pub_rtp, _play_rtp, publisher, player) = udp_pair(&server, "cam7");
    assert_eq!(registry.session_count(), 2);

    drop(player);
    assert!(eventually(|| registry.session_count() == 1), "player session left behind");
    assert!(registry.publisher("cam7").is_some());

    drop(publisher);
    assert!(eventually(|| registry.session_count() == 0), "publisher session left behind");
    assert_eq!(registry.publisher("cam7"), None);
}

#[test]
fn malformed_request_gets_bad_request() {
    let server = start_server(&["tcp"]);
    let addr = server.control_addr().unwrap();

    let mut client = Client::connect(addr);
    client.writer.write_all(b"GARBAGE\r\nCSeq: 1\r\n\r\n").unwrap();
    let resp = client.read_response();
    assert!(resp.starts_with("RTSP/1.0 400 Bad Request"), "got: {}", status(&resp));
    assert_eq!(header(&resp, "cseq"), Some("1"));

    // The connection survives the bad request.
    let resp = client.request("OPTIONS", &format!("rtsp://{addr}/cam8"), &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "OPTIONS: {}", status(&resp));
}

#[test]
fn second_publisher_on_same_path_is_refused() {
    let server = start_server(&["tcp"]);
    let addr = server.control_addr().unwrap();
    let uri = format!("rtsp://{addr}/cam3");
    let transport = ("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record");

    let mut first = Client::connect(addr);
    let resp = first.request("SETUP", &uri, &[transport], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "first SETUP: {}", status(&resp));

    let mut second = Client::connect(addr);
    let resp = second.request("SETUP", &uri, &[transport], "");
    assert!(resp.starts_with("RTSP/1.0 400"), "second SETUP: {}", status(&resp));

    // The refused connection stays usable.
    let resp = second.request("OPTIONS", &uri, &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"));
    assert!(server.registry().publisher("cam3").is_some());
}

#[test]
fn disabled_transport_is_refused() {
    let server = start_server(&["tcp"]);
    let addr = server.control_addr().unwrap();
    assert!(server.datagram_addrs().is_none());

    let mut client = Client::connect(addr);
    let resp = client.request(
        "SETUP",
        &format!("rtsp://{addr}/cam4"),
        &[("Transport", "RTP/AVP;unicast;client_port=5000-5001;mode=record")],
        "",
    );
    assert!(resp.starts_with("RTSP/1.0 461"), "SETUP: {}", status(&resp));
    assert_eq!(server.registry().session_count(), 0);
}

#[test]
fn teardown_frees_the_path() {
    let server = start_server(&["tcp"]);
    let addr = server.control_addr().unwrap();
    let uri = format!("rtsp://{addr}/cam5");
    let transport = ("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record");

    let mut first = Client::connect(addr);
    let resp = first.request("SETUP", &uri, &[transport], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"));
    let resp = first.request("TEARDOWN", &uri, &[], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "TEARDOWN: {}", status(&resp));

    // TEARDOWN closes the connection.
    let mut rest = Vec::new();
    assert_eq!(first.reader.read_to_end(&mut rest).unwrap(), 0);
    assert_eq!(server.registry().publisher("cam5"), None);

    let mut second = Client::connect(addr);
    let resp = second.request("SETUP", &uri, &[transport], "");
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP after teardown: {}", status(&resp));
}

#[test]
fn start_twice_is_rejected() {
    let mut server = start_server(&["tcp"]);
    assert!(server.start().is_err());
    server.stop();
    assert!(!server.is_running());
}
