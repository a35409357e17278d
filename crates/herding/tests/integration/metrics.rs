use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::time::Duration;

use herding::Work;

use crate::setup_herd;

/// Receives every datagram that arrives until the socket stays silent.
fn drain(socket: &UdpSocket) -> Vec<String> {
    let mut buf = [0; 1024];
    let mut packets = Vec::new();
    while let Ok(len) = socket.recv(&mut buf) {
        packets.push(String::from_utf8_lossy(&buf[..len]).into_owned());
    }
    packets
}

/// This is the only test configuring metrics, which can happen once per process.
#[tokio::test]
async fn test_stale_read_is_counted_once() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    herding::metrics::configure_statsd("herding", socket.local_addr().unwrap(), BTreeMap::new())
        .unwrap();

    let herd = setup_herd(|config| {
        config.name = "stale-metrics".into();
        config.stale = true;
        config.max_age = Some(Duration::from_millis(1));
    });

    herd.obtain("key".to_owned(), || Work::ready(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // served stale, then a new computation, then a live hit
    assert_eq!(herd.obtain("key".to_owned(), || Work::ready(2)).await, Ok(1));
    assert_eq!(herd.obtain("key".to_owned(), || Work::ready(3)).await, Ok(3));
    assert_eq!(herd.obtain("key".to_owned(), || Work::ready(4)).await, Ok(3));

    let packets: Vec<_> = drain(&socket)
        .into_iter()
        .filter(|packet| packet.contains("herd:stale-metrics"))
        .collect();
    let count = |name: &str| {
        packets
            .iter()
            .filter(|packet| packet.starts_with(&format!("herding.{name}:")))
            .count()
    };

    assert_eq!(count("herd.access"), 4);
    assert_eq!(count("herd.stale.hit"), 1);
    assert_eq!(count("herd.memory.hit"), 1);
    assert_eq!(count("herd.computation"), 2);
}
