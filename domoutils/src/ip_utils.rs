use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use get_if_addrs::get_if_addrs;

/// Devine l'adresse IPv4 locale utilisée pour le trafic sortant.
///
/// La méthode classique : un socket UDP « connecté » vers une adresse
/// publique (aucun datagramme n'est envoyé), puis lecture de l'adresse
/// locale choisie par la table de routage. Retombe sur 127.0.0.1 si la
/// machine n'a aucune route.
pub fn guess_local_ip() -> Ipv4Addr {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("8.8.8.8:80").is_ok() {
            if let Ok(local_addr) = socket.local_addr() {
                if let IpAddr::V4(v4) = local_addr.ip() {
                    return v4;
                }
            }
        }
    }
    Ipv4Addr::LOCALHOST
}

/// Liste les adresses IPv4 non-loopback de la machine.
///
/// Sert à joindre le groupe multicast SSDP sur chaque interface.
pub fn list_ipv4_interfaces() -> Vec<Ipv4Addr> {
    let mut out = Vec::new();
    if let Ok(interfaces) = get_if_addrs() {
        for iface in interfaces {
            if let IpAddr::V4(v4) = iface.ip() {
                if !v4.is_loopback() {
                    out.push(v4);
                }
            }
        }
    }
    out
}
