/*!
Le client SSDP est un *control point*. Son socket unicast ne doit **pas**
être lié au port 1900 :

* le socket multicast (0.0.0.0:1900, SO_REUSEADDR) reçoit les NOTIFY du
  réseau ;
* le socket unicast (port éphémère) émet les M-SEARCH et reçoit leurs
  réponses 200 OK.

Si les deux étaient liés sur 1900, le noyau répartirait les datagrammes
entrants entre eux et des réponses seraient perdues aléatoirement.
*/

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::types::{ProductTokens, SearchTarget};

use super::message::{Search, SsdpMessage};
use super::socket::{group_addr, multicast_socket, unicast_socket};
use super::SSDP_MAX_DATAGRAM;

/// Un datagramme SSDP décodé, avec son émetteur.
#[derive(Debug, Clone)]
pub struct ReceivedSsdp {
    pub message: SsdpMessage,
    pub from: SocketAddr,
}

/// Client SSDP : émission de M-SEARCH, écoute des annonces.
pub struct SsdpClient {
    unicast: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    user_agent: ProductTokens,
}

impl SsdpClient {
    /// Démarre le client et retourne le flux d'événements décodés.
    ///
    /// Deux boucles de réception alimentent le même canal : celle du
    /// socket multicast (NOTIFY alive/byebye/update) et celle du socket
    /// unicast (réponses 200 OK aux M-SEARCH émis).
    pub fn start(user_agent: ProductTokens) -> std::io::Result<(Self, Receiver<ReceivedSsdp>)> {
        let multicast = Arc::new(multicast_socket()?);
        let unicast = Arc::new(unicast_socket()?);
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = unbounded::<ReceivedSsdp>();

        spawn_receiver("ssdp-notify", Arc::clone(&multicast), tx.clone(), Arc::clone(&running));
        spawn_receiver("ssdp-replies", Arc::clone(&unicast), tx, Arc::clone(&running));

        info!("✅ SSDP client ready (unicast port {})", unicast.local_addr()?.port());

        Ok((
            Self {
                unicast,
                running,
                user_agent,
            },
            rx,
        ))
    }

    /// Émet un M-SEARCH multicast pour `target`.
    ///
    /// Les réponses arrivent sur le flux d'événements pendant la fenêtre
    /// d'écoute (MX + 1 secondes après l'émission).
    pub fn search(&self, target: &SearchTarget, mx: u32) -> std::io::Result<()> {
        let search = Search::new(target.clone(), mx, Some(self.user_agent.clone()));
        let encoded = SsdpMessage::Search(search.clone()).encode();
        self.unicast.send_to(encoded.as_bytes(), group_addr())?;
        info!("📤 M-SEARCH sent (ST={}, MX={})", search.target, search.mx);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for SsdpClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_receiver(
    name: &str,
    socket: Arc<UdpSocket>,
    tx: Sender<ReceivedSsdp>,
    running: Arc<AtomicBool>,
) {
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut buf = [0u8; SSDP_MAX_DATAGRAM + 1];
            while running.load(Ordering::SeqCst) {
                let (len, from) = match socket.recv_from(&mut buf) {
                    Ok(pair) => pair,
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        warn!("❌ SSDP client read error: {}", e);
                        continue;
                    }
                };

                let message = match SsdpMessage::decode(&buf[..len]) {
                    Ok(SsdpMessage::Search(_)) => {
                        // Un autre control point interroge le réseau ;
                        // nous ne sommes pas un device, on ignore.
                        continue;
                    }
                    Ok(message) => message,
                    Err(e) => {
                        // UDP n'a pas de canal de retour : on journalise
                        // et on jette.
                        debug!("📥 Dropping malformed SSDP datagram from {}: {}", from, e);
                        continue;
                    }
                };

                if tx.send(ReceivedSsdp { message, from }).is_err() {
                    break; // plus personne n'écoute
                }
            }
        })
        .expect("failed to spawn ssdp receiver thread");
}
