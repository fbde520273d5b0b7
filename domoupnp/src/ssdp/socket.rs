//! Construction des sockets UDP SSDP.
//!
//! Deux sockets distincts par moteur :
//!
//! * le socket multicast, lié sur 0.0.0.0:1900 (avec SO_REUSEADDR pour
//!   cohabiter avec d'autres piles UPnP de la machine) et abonné au
//!   groupe 239.255.255.250 sur chaque interface IPv4 ;
//! * le socket unicast, lié sur un port éphémère, pour émettre les
//!   M-SEARCH et transporter les réponses 200 OK.
//!
//! Les deux ne doivent JAMAIS partager le port 1900 : le noyau
//! répartirait alors les datagrammes entrants entre les deux sockets et
//! des messages seraient perdus aléatoirement.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use super::{SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Période de réveil des boucles de réception (permet l'arrêt propre).
pub const RECV_TICK: Duration = Duration::from_secs(1);

/// Socket multicast lié sur 0.0.0.0:1900, abonné au groupe SSDP.
pub fn multicast_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, SSDP_PORT).into();
    socket.bind(&bind_addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(RECV_TICK))?;
    socket.set_multicast_loop_v4(true)?;

    let mut joined = 0usize;
    for iface in domoutils::list_ipv4_interfaces() {
        match socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &iface) {
            Ok(()) => {
                debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR, iface);
                joined += 1;
            }
            Err(e) => {
                warn!("SSDP: failed to join {} on {}: {}", SSDP_MULTICAST_ADDR, iface, e);
            }
        }
    }
    if joined == 0 {
        // Machine sans interface détectée : abonnement par défaut.
        socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    }

    Ok(socket)
}

/// Socket unicast éphémère pour les M-SEARCH et leurs réponses.
pub fn unicast_socket() -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_read_timeout(Some(RECV_TICK))?;
    Ok(socket)
}

/// Adresse du groupe multicast, prête pour `send_to`.
pub fn group_addr() -> SocketAddr {
    (SSDP_MULTICAST_ADDR, SSDP_PORT).into()
}
