//! End-to-end proxy filtering tests with mock SSH agent

use agentbox_ssh_proxy::agent::{ProxyOptions, ProxyServer, Transport};
use agentbox_ssh_proxy::filter::AllowList;
use agentbox_ssh_proxy::protocol::{
    AgentCodec, AgentMessage, Identity, build_identities_answer, parse_identities,
};
use bytes::{BufMut, Bytes, BytesMut};
use ssh_key::PublicKey;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixListener, UnixStream};

// Pre-generated test keys (same as integration_test.rs)
const ED25519_KEY_LAPTOP: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl laptop-key";
const ED25519_KEY_PHONE: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHUu2eEV0kRvK3dMRlSFwHxVoNxCfwjKmAZBlhkNjC4i phone-key";
const ED25519_KEY_DEPLOY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIKwfZn/9xXqbDtEzpAEZEoEBllBkLR+NpVHhMxCmyC9L deploy@laptop";

const SIGNATURE: &[u8] = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x03sig";

fn make_identity(key_str: &str) -> Identity {
    let public_key: PublicKey = key_str.parse().unwrap();
    let key_blob = Bytes::from(public_key.to_bytes().unwrap());
    let comment = key_str.split_whitespace().nth(2).unwrap_or("").to_string();
    Identity::new(key_blob, comment)
}

fn all_identities() -> Vec<Identity> {
    vec![
        make_identity(ED25519_KEY_LAPTOP),
        make_identity(ED25519_KEY_PHONE),
        make_identity(ED25519_KEY_DEPLOY),
    ]
}

/// Mock upstream agent that records every frame body it receives
struct MockAgent {
    received: Arc<Mutex<Vec<Bytes>>>,
}

impl MockAgent {
    fn frames(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }

    /// Sign request bodies that reached the agent
    fn sign_requests(&self) -> Vec<Bytes> {
        self.frames()
            .into_iter()
            .filter(|f| f.first() == Some(&13))
            .collect()
    }
}

/// Start a mock SSH agent serving `identities`. Sign requests for
/// `slow_blob` are answered after `delay`.
fn start_mock_agent(
    socket_path: &Path,
    identities: Vec<Identity>,
    slow_blob: Option<(Bytes, Duration)>,
) -> MockAgent {
    let listener = UnixListener::bind(socket_path).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&received);

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };

            let identities = identities.clone();
            let slow_blob = slow_blob.clone();
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                loop {
                    let body = match AgentCodec::read_frame(&mut reader).await {
                        Ok(Some(body)) => body,
                        _ => break,
                    };
                    recorder.lock().unwrap().push(body.clone());

                    let response = match AgentMessage::decode(&body).unwrap() {
                        AgentMessage::RequestIdentities => build_identities_answer(&identities),
                        AgentMessage::SignRequest(payload) => {
                            if let Some((blob, delay)) = &slow_blob {
                                if payload[4..].starts_with(blob) {
                                    tokio::time::sleep(*delay).await;
                                }
                            }
                            AgentMessage::SignResponse(Bytes::from_static(SIGNATURE)).encode()
                        }
                        _ => AgentMessage::failure().encode(),
                    };

                    if AgentCodec::write_frame(&mut writer, &response).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    MockAgent { received }
}

struct Fixture {
    _temp_dir: TempDir,
    agent: MockAgent,
    server: ProxyServer,
}

impl Fixture {
    async fn start(entries: &[&str]) -> Self {
        Self::start_with(entries, false, None).await
    }

    async fn start_with(
        entries: &[&str],
        tcp: bool,
        slow_blob: Option<(Bytes, Duration)>,
    ) -> Self {
        Self::serve(entries, all_identities(), tcp, slow_blob).await
    }

    async fn serve(
        entries: &[&str],
        identities: Vec<Identity>,
        tcp: bool,
        slow_blob: Option<(Bytes, Duration)>,
    ) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let upstream_path = temp_dir.path().join("upstream.sock");
        let agent = start_mock_agent(&upstream_path, identities, slow_blob);

        let transport = if tcp {
            Transport::Tcp
        } else {
            Transport::Unix {
                sockets_dir: temp_dir.path().join("sockets"),
            }
        };
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        let allow_list = AllowList::parse(&entries).unwrap();

        let mut server =
            ProxyServer::new(ProxyOptions::new(&upstream_path, allow_list, transport)).unwrap();
        server.start().await.unwrap();

        Self {
            _temp_dir: temp_dir,
            agent,
            server,
        }
    }

    async fn connect(&self) -> UnixStream {
        UnixStream::connect(self.server.socket_path().unwrap())
            .await
            .unwrap()
    }
}

/// Send REQUEST_IDENTITIES and parse the answer
async fn list_keys<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Vec<Identity> {
    AgentCodec::write(stream, &AgentMessage::RequestIdentities)
        .await
        .unwrap();
    match AgentCodec::read(stream).await.unwrap().unwrap() {
        AgentMessage::IdentitiesAnswer(payload) => parse_identities(&payload),
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Full SIGN_REQUEST body for `blob`
fn sign_request_body(blob: &[u8], data: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(13);
    buf.put_u32(blob.len() as u32);
    buf.put_slice(blob);
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.put_u32(0);
    buf.freeze()
}

async fn sign<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, body: &Bytes) -> AgentMessage {
    AgentCodec::write_frame(stream, body).await.unwrap();
    AgentCodec::read(stream).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_listing_filtered_by_comment() {
    let fixture = Fixture::start(&["laptop"]).await;
    let mut client = fixture.connect().await;

    let keys = list_keys(&mut client).await;
    let comments: Vec<_> = keys.iter().map(|k| k.comment()).collect();
    assert_eq!(comments, vec!["laptop-key", "deploy@laptop"]);
}

#[tokio::test]
async fn test_allowed_and_denied_sign_requests() {
    let fixture = Fixture::start(&["laptop-key"]).await;
    let laptop = make_identity(ED25519_KEY_LAPTOP);
    let phone = make_identity(ED25519_KEY_PHONE);
    let mut client = fixture.connect().await;

    let keys = list_keys(&mut client).await;
    assert_eq!(keys, vec![laptop.clone()]);

    let denied = sign_request_body(&phone.blob, b"challenge");
    assert_eq!(sign(&mut client, &denied).await, AgentMessage::Failure);

    let allowed = sign_request_body(&laptop.blob, b"challenge");
    assert_eq!(
        sign(&mut client, &allowed).await,
        AgentMessage::SignResponse(Bytes::from_static(SIGNATURE))
    );

    // Only the allowed request reached the agent, byte-for-byte
    assert_eq!(fixture.agent.sign_requests(), vec![allowed]);
}

#[tokio::test]
async fn test_denied_blob_never_reaches_upstream() {
    let fixture = Fixture::start(&["laptop-key"]).await;
    let phone = make_identity(ED25519_KEY_PHONE);
    let deploy = make_identity(ED25519_KEY_DEPLOY);
    let mut client = fixture.connect().await;

    list_keys(&mut client).await;
    for identity in [&phone, &deploy, &phone] {
        let body = sign_request_body(&identity.blob, b"data");
        assert_eq!(sign(&mut client, &body).await, AgentMessage::Failure);
    }

    assert!(fixture.agent.sign_requests().is_empty());
}

#[tokio::test]
async fn test_empty_allow_list_forwards_everything() {
    let fixture = Fixture::start(&[]).await;
    let mut client = fixture.connect().await;

    assert_eq!(list_keys(&mut client).await, all_identities());

    let unlisted = sign_request_body(b"not-a-listed-key", b"data");
    assert_eq!(
        sign(&mut client, &unlisted).await,
        AgentMessage::SignResponse(Bytes::from_static(SIGNATURE))
    );
    assert_eq!(fixture.agent.sign_requests(), vec![unlisted]);
}

#[tokio::test]
async fn test_fingerprint_entry() {
    // Fingerprint prefix of the phone key
    let fixture = Fixture::start(&["SHA256:Vm0lUjBIwCNg"]).await;
    let mut client = fixture.connect().await;

    let keys = list_keys(&mut client).await;
    assert_eq!(keys, vec![make_identity(ED25519_KEY_PHONE)]);
}

#[tokio::test]
async fn test_prewarmed_cache_denies_without_listing() {
    let fixture = Fixture::start(&["laptop-key"]).await;
    let phone = make_identity(ED25519_KEY_PHONE);
    let laptop = make_identity(ED25519_KEY_LAPTOP);

    // Fresh connection, no REQUEST_IDENTITIES first
    let mut client = fixture.connect().await;
    let denied = sign_request_body(&phone.blob, b"data");
    assert_eq!(sign(&mut client, &denied).await, AgentMessage::Failure);

    let allowed = sign_request_body(&laptop.blob, b"data");
    assert!(matches!(
        sign(&mut client, &allowed).await,
        AgentMessage::SignResponse(_)
    ));
}

#[tokio::test]
async fn test_other_messages_pass_through() {
    let fixture = Fixture::start(&["laptop"]).await;
    let mut client = fixture.connect().await;

    // SSH_AGENTC_EXTENSION with an arbitrary payload
    let extension = Bytes::from_static(b"\x1b\x00\x00\x00\x04test");
    AgentCodec::write_frame(&mut client, &extension).await.unwrap();
    assert_eq!(
        AgentCodec::read(&mut client).await.unwrap().unwrap(),
        AgentMessage::Failure
    );
    assert!(fixture.agent.frames().contains(&extension));
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let laptop = make_identity(ED25519_KEY_LAPTOP);
    let deploy = make_identity(ED25519_KEY_DEPLOY);
    let slow = Some((laptop.blob.clone(), Duration::from_millis(800)));
    let fixture = Fixture::start_with(&["laptop"], false, slow).await;

    let mut slow_client = fixture.connect().await;
    let mut fast_client = fixture.connect().await;

    let slow_body = sign_request_body(&laptop.blob, b"slow");
    let slow_task = tokio::spawn(async move { sign(&mut slow_client, &slow_body).await });
    // Let the slow request reach the agent first
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let fast_body = sign_request_body(&deploy.blob, b"fast");
    let fast = sign(&mut fast_client, &fast_body).await;
    assert!(matches!(fast, AgentMessage::SignResponse(_)));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!slow_task.is_finished());

    assert!(matches!(
        slow_task.await.unwrap(),
        AgentMessage::SignResponse(_)
    ));
}

#[tokio::test]
async fn test_tcp_transport() {
    let fixture = Fixture::start_with(&["phone"], true, None).await;
    let port = fixture.server.tcp_port().unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let keys = list_keys(&mut client).await;
    assert_eq!(keys, vec![make_identity(ED25519_KEY_PHONE)]);
}

#[tokio::test]
async fn test_socket_and_directory_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::start(&[]).await;
    let socket_path = fixture.server.socket_path().unwrap();
    let dir = socket_path.parent().unwrap();

    let socket_mode = std::fs::metadata(socket_path).unwrap().permissions().mode();
    let dir_mode = std::fs::metadata(dir).unwrap().permissions().mode();
    assert_eq!(socket_mode & 0o777, 0o600);
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[tokio::test]
async fn test_stop_and_restart() {
    let mut fixture = Fixture::start(&["laptop"]).await;
    let first = fixture.server.socket_path().unwrap().to_path_buf();

    fixture.server.stop();
    fixture.server.stop();
    assert!(!fixture.server.is_running());
    assert!(!first.exists());

    fixture.server.start().await.unwrap();
    fixture.server.start().await.unwrap();
    let second = fixture.server.socket_path().unwrap().to_path_buf();
    assert_ne!(first, second);

    let mut client = fixture.connect().await;
    assert_eq!(list_keys(&mut client).await.len(), 2);
}

#[tokio::test]
async fn test_existing_session_survives_stop() {
    let mut fixture = Fixture::start(&[]).await;
    let mut client = fixture.connect().await;
    assert_eq!(list_keys(&mut client).await.len(), 3);

    fixture.server.stop();
    // Give the accept loop a moment to observe the shutdown
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(list_keys(&mut client).await.len(), 3);
}

#[tokio::test]
async fn test_denied_reply_keeps_request_order() {
    let laptop = make_identity(ED25519_KEY_LAPTOP);
    let phone = make_identity(ED25519_KEY_PHONE);
    let slow = Some((laptop.blob.clone(), Duration::from_millis(300)));
    let fixture = Fixture::start_with(&["laptop-key"], false, slow).await;
    let mut client = fixture.connect().await;

    // Pipelined: allowed (slow upstream) then denied, before reading anything
    let allowed = sign_request_body(&laptop.blob, b"first");
    let denied = sign_request_body(&phone.blob, b"second");
    AgentCodec::write_frame(&mut client, &allowed).await.unwrap();
    AgentCodec::write_frame(&mut client, &denied).await.unwrap();

    let first = AgentCodec::read(&mut client).await.unwrap().unwrap();
    let second = AgentCodec::read(&mut client).await.unwrap().unwrap();
    assert_eq!(first, AgentMessage::SignResponse(Bytes::from_static(SIGNATURE)));
    assert_eq!(second, AgentMessage::Failure);
    assert_eq!(fixture.agent.sign_requests(), vec![allowed]);
}

#[tokio::test]
async fn test_oversized_frame_closes_only_that_session() {
    let fixture = Fixture::start(&["laptop-key"]).await;
    let laptop = make_identity(ED25519_KEY_LAPTOP);
    let mut bad_client = fixture.connect().await;
    let mut good_client = fixture.connect().await;

    // Declare a body one byte over the 256 KiB limit
    bad_client
        .write_all(&262_145u32.to_be_bytes())
        .await
        .unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), AgentCodec::read(&mut bad_client))
        .await
        .expect("oversized frame should close the session");
    assert!(matches!(closed, Ok(None) | Err(_)));

    assert_eq!(list_keys(&mut good_client).await, vec![laptop.clone()]);
    let body = sign_request_body(&laptop.blob, b"still-serving");
    assert_eq!(
        sign(&mut good_client, &body).await,
        AgentMessage::SignResponse(Bytes::from_static(SIGNATURE))
    );

    // The proxy keeps accepting new clients too
    let mut late_client = fixture.connect().await;
    assert_eq!(list_keys(&mut late_client).await.len(), 1);
}

#[tokio::test]
async fn test_non_utf8_comment_reaches_client_verbatim() {
    let laptop = make_identity(ED25519_KEY_LAPTOP);
    let raw_comment = Bytes::from_static(b"laptop-\xff\xfe");
    let identity = Identity::from_wire(laptop.blob.clone(), raw_comment.clone());
    let fixture = Fixture::serve(&["laptop-"], vec![identity], false, None).await;
    let mut client = fixture.connect().await;

    AgentCodec::write(&mut client, &AgentMessage::RequestIdentities)
        .await
        .unwrap();
    let body = AgentCodec::read_frame(&mut client).await.unwrap().unwrap();

    let mut expected = BytesMut::new();
    expected.put_u8(12);
    expected.put_u32(1);
    expected.put_u32(laptop.blob.len() as u32);
    expected.put_slice(&laptop.blob);
    expected.put_u32(raw_comment.len() as u32);
    expected.put_slice(&raw_comment);
    assert_eq!(body, expected.freeze());
}
