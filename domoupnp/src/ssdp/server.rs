//! Serveur SSDP : annonces des devices hébergés et réponses M-SEARCH.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use crate::types::{DiscoveryType, ProductTokens, SearchTarget, Udn};

use super::message::{Alive, ByeBye, SearchResponse, SsdpError, SsdpMessage, Update};
use super::socket::{group_addr, multicast_socket, unicast_socket};
use super::{clamp_mx, clamp_max_age};

/// Nombre de répétitions de chaque NOTIFY (UDA : « should be sent three times »).
const NOTIFY_REPEAT: usize = 3;

/// Bornes du délai aléatoire entre deux répétitions, en millisecondes.
const REPEAT_GAP_MS: (u64, u64) = (50, 200);

/// Granularité des boucles d'attente interruptibles.
const TICK: Duration = Duration::from_millis(250);

/// Tout ce qu'il faut annoncer pour un arbre de devices hébergé.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub root_udn: Udn,
    /// USNs dans l'ordre d'annonce : rootdevice, puis UDN, puis types de
    /// device, puis types de service.
    pub usns: Vec<DiscoveryType>,
    pub location: Url,
    pub server: ProductTokens,
    pub max_age: u32,
    pub boot_id: u32,
    pub config_id: u32,
}

impl Advertisement {
    /// Un NOTIFY ssdp:alive par USN, dans l'ordre d'annonce.
    pub fn alive_messages(&self) -> Result<Vec<SsdpMessage>, SsdpError> {
        self.usns
            .iter()
            .map(|usn| {
                Alive::new(
                    usn.clone(),
                    self.location.clone(),
                    self.server.clone(),
                    self.max_age,
                    Some(self.boot_id),
                    Some(self.config_id),
                    None,
                )
                .map(SsdpMessage::Alive)
            })
            .collect()
    }

    /// Un NOTIFY ssdp:byebye par USN.
    pub fn byebye_messages(&self) -> Vec<SsdpMessage> {
        self.usns
            .iter()
            .map(|usn| {
                SsdpMessage::ByeBye(ByeBye {
                    usn: usn.clone(),
                    boot_id: Some(self.boot_id),
                    config_id: Some(self.config_id),
                })
            })
            .collect()
    }

    /// Un NOTIFY ssdp:update par USN, annonçant `next_boot_id`.
    pub fn update_messages(&self, next_boot_id: u32) -> Vec<SsdpMessage> {
        self.usns
            .iter()
            .map(|usn| {
                SsdpMessage::Update(Update {
                    usn: usn.clone(),
                    location: self.location.clone(),
                    boot_id: self.boot_id,
                    config_id: self.config_id,
                    next_boot_id,
                    search_port: None,
                })
            })
            .collect()
    }

    /// USNs couverts par la cible de recherche `st` (avec compatibilité
    /// descendante des versions).
    pub fn matching_usns(&self, st: &SearchTarget) -> Vec<&DiscoveryType> {
        self.usns.iter().filter(|usn| st.covers(usn)).collect()
    }

    /// Réponse 200 OK pour `usn`, en écho de la cible demandée.
    pub fn response_for(
        &self,
        st: &SearchTarget,
        usn: &DiscoveryType,
    ) -> Result<SearchResponse, SsdpError> {
        SearchResponse::new(
            st.clone(),
            usn.clone(),
            self.location.clone(),
            self.server.clone(),
            self.max_age,
            Some(self.boot_id),
            Some(self.config_id),
        )
    }
}

/// Serveur SSDP côté device host.
///
/// Trois responsabilités : la rafale d'annonces à l'enregistrement et au
/// retrait, la ré-annonce périodique dans [max-age/4, max-age/2], et les
/// réponses unicast aux M-SEARCH après le délai aléatoire [0, min(MX,5)].
pub struct SsdpServer {
    multicast: Arc<UdpSocket>,
    unicast: Arc<UdpSocket>,
    ads: Arc<RwLock<HashMap<Udn, Advertisement>>>,
    running: Arc<AtomicBool>,
}

impl SsdpServer {
    /// Démarre le serveur : sockets, écoute M-SEARCH, ré-annonces.
    pub fn start() -> std::io::Result<Self> {
        let multicast = Arc::new(multicast_socket()?);
        let unicast = Arc::new(unicast_socket()?);
        let ads = Arc::new(RwLock::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));

        let server = Self {
            multicast,
            unicast,
            ads,
            running,
        };
        server.spawn_search_listener();
        server.spawn_refresh_loop();

        info!("✅ SSDP server started on {}", group_addr());
        Ok(server)
    }

    /// Enregistre un arbre et émet sa rafale ssdp:alive initiale.
    pub fn announce(&self, ad: Advertisement) {
        {
            let mut ads = self.ads.write().unwrap();
            ads.insert(ad.root_udn.clone(), ad.clone());
        }
        match ad.alive_messages() {
            Ok(messages) => self.send_burst(&messages),
            Err(e) => warn!("❌ Cannot build alive burst for {}: {}", ad.root_udn, e),
        }
    }

    /// Retire un arbre et émet sa rafale ssdp:byebye.
    pub fn withdraw(&self, udn: &Udn) {
        let ad = self.ads.write().unwrap().remove(udn);
        if let Some(ad) = ad {
            self.send_burst(&ad.byebye_messages());
            info!("👋 Withdrawn {}", udn);
        }
    }

    /// Annonce un nextBootId en attente via ssdp:update.
    pub fn send_update(&self, udn: &Udn, next_boot_id: u32) {
        let messages = {
            let ads = self.ads.read().unwrap();
            ads.get(udn).map(|ad| ad.update_messages(next_boot_id))
        };
        if let Some(messages) = messages {
            for msg in &messages {
                self.send_multicast(msg);
            }
        }
    }

    /// Arrêt propre : byebye pour tout ce qui est encore annoncé.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("✅ Shutting down SSDP server, sending byebye for all devices");
        let ads: Vec<Advertisement> = self.ads.write().unwrap().drain().map(|(_, ad)| ad).collect();
        for ad in ads {
            self.send_burst(&ad.byebye_messages());
        }
    }

    /// Émet chaque message trois fois, avec un délai aléatoire court
    /// entre les répétitions.
    fn send_burst(&self, messages: &[SsdpMessage]) {
        let mut rng = rand::thread_rng();
        for msg in messages {
            for repeat in 0..NOTIFY_REPEAT {
                self.send_multicast(msg);
                if repeat + 1 < NOTIFY_REPEAT {
                    let gap = rng.gen_range(REPEAT_GAP_MS.0..=REPEAT_GAP_MS.1);
                    thread::sleep(Duration::from_millis(gap));
                }
            }
        }
    }

    fn send_multicast(&self, msg: &SsdpMessage) {
        let encoded = msg.encode();
        if let Err(e) = self.multicast.send_to(encoded.as_bytes(), group_addr()) {
            warn!("❌ Failed to send SSDP notify: {}", e);
        }
    }

    fn spawn_search_listener(&self) {
        let socket = Arc::clone(&self.multicast);
        let unicast = Arc::clone(&self.unicast);
        let ads = Arc::clone(&self.ads);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("ssdp-search".into())
            .spawn(move || {
                let mut buf = [0u8; super::SSDP_MAX_DATAGRAM + 1];
                while running.load(Ordering::SeqCst) {
                    let (len, src) = match socket.recv_from(&mut buf) {
                        Ok(pair) => pair,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            warn!("❌ SSDP read error: {}", e);
                            continue;
                        }
                    };

                    let search = match SsdpMessage::decode(&buf[..len]) {
                        Ok(SsdpMessage::Search(search)) => search,
                        Ok(_) => continue, // annonces des autres : rôle client
                        Err(e) => {
                            debug!("Dropping malformed SSDP datagram from {}: {}", src, e);
                            continue;
                        }
                    };

                    Self::answer_search(&unicast, &ads, search, src);
                }
            })
            .expect("failed to spawn ssdp-search thread");
    }

    /// Planifie la réponse à un M-SEARCH : délai aléatoire dans
    /// [0, min(MX,5)] secondes puis une réponse unicast par USN couvert.
    fn answer_search(
        unicast: &Arc<UdpSocket>,
        ads: &Arc<RwLock<HashMap<Udn, Advertisement>>>,
        search: super::message::Search,
        src: SocketAddr,
    ) {
        let responses: Vec<SearchResponse> = {
            let ads = ads.read().unwrap();
            ads.values()
                .flat_map(|ad| {
                    ad.matching_usns(&search.target)
                        .into_iter()
                        .filter_map(|usn| ad.response_for(&search.target, usn).ok())
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        if responses.is_empty() {
            return;
        }
        debug!(
            "📡 M-SEARCH from {} (ST={}) matches {} USN(s)",
            src,
            search.target,
            responses.len()
        );

        let unicast = Arc::clone(unicast);
        let delay_ms = rand::thread_rng().gen_range(0..=u64::from(clamp_mx(search.mx)) * 1000);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            for response in responses {
                let encoded = SsdpMessage::Response(response).encode();
                if let Err(e) = unicast.send_to(encoded.as_bytes(), src) {
                    warn!("❌ Failed to send M-SEARCH response to {}: {}", src, e);
                }
            }
        });
    }

    /// Ré-annonce périodique : délai uniforme dans [max-age/4, max-age/2].
    fn spawn_refresh_loop(&self) {
        let ads = Arc::clone(&self.ads);
        let running = Arc::clone(&self.running);
        let multicast = Arc::clone(&self.multicast);

        thread::Builder::new()
            .name("ssdp-refresh".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let max_age = {
                        let ads = ads.read().unwrap();
                        ads.values().map(|ad| ad.max_age).min()
                    };
                    let max_age = clamp_max_age(max_age.unwrap_or(1800));
                    let delay_secs =
                        rand::thread_rng().gen_range(u64::from(max_age) / 4..=u64::from(max_age) / 2);

                    let deadline = Instant::now() + Duration::from_secs(delay_secs.max(1));
                    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
                        thread::sleep(TICK);
                    }
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }

                    let snapshot: Vec<Advertisement> =
                        ads.read().unwrap().values().cloned().collect();
                    for ad in snapshot {
                        match ad.alive_messages() {
                            Ok(messages) => {
                                let mut rng = rand::thread_rng();
                                for msg in &messages {
                                    for repeat in 0..NOTIFY_REPEAT {
                                        let encoded = msg.encode();
                                        if let Err(e) =
                                            multicast.send_to(encoded.as_bytes(), group_addr())
                                        {
                                            warn!("❌ Periodic notify failed: {}", e);
                                        }
                                        if repeat + 1 < NOTIFY_REPEAT {
                                            let gap =
                                                rng.gen_range(REPEAT_GAP_MS.0..=REPEAT_GAP_MS.1);
                                            thread::sleep(Duration::from_millis(gap));
                                        }
                                    }
                                }
                                debug!("✅ Periodic re-advertisement for {}", ad.root_udn);
                            }
                            Err(e) => warn!("❌ Periodic burst failed for {}: {}", ad.root_udn, e),
                        }
                    }
                }
            })
            .expect("failed to spawn ssdp-refresh thread");
    }
}

impl Drop for SsdpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
