//! Moteur d'événements côté host : files par SID, livraison FIFO.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use url::Url;

use crate::errors::UpnpError;
use crate::http::{endpoint_of, request_for, HttpClient, HttpRequest, WorkerPool};
use crate::soap::CONTENT_TYPE_XML;

use super::subscriptions::{PendingEvent, SubscribeAck, SubscribeRequest, SubscriptionTable};
use super::{NTS_PROPCHANGE, NT_EVENT};

/// Cadence de la boucle d'entretien (expiration + pompage des files).
const TICK: Duration = Duration::from_millis(250);

/// Échéance de livraison d'un NOTIFY.
const NOTIFY_DEADLINE: Duration = Duration::from_secs(30);

/// Moteur d'événements : une table de souscriptions par service hébergé
/// (clé = route d'événement du service).
pub struct EventEngine {
    services: Mutex<HashMap<String, SubscriptionTable>>,
    client: HttpClient,
    pool: WorkerPool,
    running: Arc<AtomicBool>,
}

impl EventEngine {
    /// Crée le moteur et démarre sa boucle d'entretien.
    pub fn start(client: HttpClient) -> Arc<Self> {
        let engine = Arc::new(Self {
            services: Mutex::new(HashMap::new()),
            client,
            pool: WorkerPool::new("gena-notify", 8, 64),
            running: Arc::new(AtomicBool::new(true)),
        });

        let tick_engine = Arc::clone(&engine);
        thread::Builder::new()
            .name("gena-tick".into())
            .spawn(move || {
                while tick_engine.running.load(Ordering::SeqCst) {
                    tick_engine.sweep_expired();
                    tick_engine.pump();
                    thread::sleep(TICK);
                }
            })
            .expect("failed to spawn gena-tick thread");

        engine
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Déclare la table d'un service (route d'événement).
    pub fn register_service(&self, event_path: &str) {
        self.services
            .lock()
            .unwrap()
            .entry(event_path.to_string())
            .or_default();
    }

    /// Retire un service et toutes ses souscriptions.
    pub fn unregister_service(&self, event_path: &str) {
        self.services.lock().unwrap().remove(event_path);
    }

    /// SUBSCRIBE (première fois ou renouvellement) sur un service.
    pub fn subscribe(
        &self,
        event_path: &str,
        request: &SubscribeRequest,
        initial: &[(String, String)],
    ) -> Result<SubscribeAck, UpnpError> {
        let mut services = self.services.lock().unwrap();
        let table = services
            .get_mut(event_path)
            .ok_or_else(|| UpnpError::ResourceNotFound(event_path.to_string()))?;
        let ack = table.subscribe(request, initial, Instant::now())?;
        info!("🔒 Subscription {} on {} ({}s)", ack.sid, event_path, ack.timeout_secs);
        Ok(ack)
    }

    /// UNSUBSCRIBE ; SID inconnu → 412.
    pub fn unsubscribe(&self, event_path: &str, sid: &str) -> Result<(), UpnpError> {
        let mut services = self.services.lock().unwrap();
        let table = services
            .get_mut(event_path)
            .ok_or_else(|| UpnpError::ResourceNotFound(event_path.to_string()))?;
        table.unsubscribe(sid)?;
        info!("❌ Unsubscribed {} from {}", sid, event_path);
        Ok(())
    }

    /// Publie des changements d'état vers toutes les souscriptions du
    /// service.
    pub fn publish(&self, event_path: &str, changes: &[(String, String)]) {
        let mut services = self.services.lock().unwrap();
        if let Some(table) = services.get_mut(event_path) {
            table.publish(changes);
        }
    }

    fn sweep_expired(&self) {
        let mut services = self.services.lock().unwrap();
        for (path, table) in services.iter_mut() {
            for sid in table.remove_expired(Instant::now()) {
                debug!("Subscription {} on {} expired", sid, path);
            }
        }
    }

    /// Lance la livraison du prochain événement de chaque souscription
    /// inactive. Le drapeau `in_flight` garantit l'ordre FIFO par SID ;
    /// les SIDs distincts se livrent en parallèle sur le pool.
    fn pump(self: &Arc<Self>) {
        let mut jobs = Vec::new();
        {
            let mut services = self.services.lock().unwrap();
            for table in services.values_mut() {
                for sub in table.iter_mut() {
                    if sub.in_flight {
                        continue;
                    }
                    if let Some(event) = sub.queue.pop_front() {
                        sub.in_flight = true;
                        jobs.push((sub.sid.clone(), sub.callbacks.clone(), event));
                    }
                }
            }
        }

        for (sid, callbacks, event) in jobs {
            let engine = Arc::clone(self);
            self.pool.submit(move || {
                engine.deliver(&sid, &callbacks, &event);
                engine.release(&sid);
            });
        }
    }

    /// Livre un événement : les URLs CALLBACK sont essayées dans
    /// l'ordre ; sur échec de connexion ou réponse non-2xx on passe à
    /// la suivante ; si toutes échouent l'événement est abandonné (pas
    /// de relivraison) et la souscription survit jusqu'à expiration.
    fn deliver(&self, sid: &str, callbacks: &[Url], event: &PendingEvent) {
        let candidates: &[Url] = if event.first_callback_only {
            let take = callbacks.len().min(1);
            &callbacks[..take]
        } else {
            callbacks
        };

        for callback in candidates {
            let Some(endpoint) = endpoint_of(callback) else {
                warn!("❌ Cannot resolve callback {}", callback);
                continue;
            };

            let request = notify_request(callback, sid, event);
            match self.client.send(endpoint, request, NOTIFY_DEADLINE) {
                Ok(response) if response.is_success() => {
                    debug!("✅ NOTIFY SEQ={} delivered to {}", event.seq, callback);
                    return;
                }
                Ok(response) => {
                    debug!(
                        "NOTIFY SEQ={} to {} answered {}",
                        event.seq, callback, response.status
                    );
                }
                Err(e) => {
                    debug!("NOTIFY SEQ={} to {} failed: {}", event.seq, callback, e);
                }
            }
        }

        warn!(
            "❌ Event SEQ={} for {} dropped: no callback accepted it",
            event.seq, sid
        );
    }

    fn release(&self, sid: &str) {
        let mut services = self.services.lock().unwrap();
        for table in services.values_mut() {
            if let Some(sub) = table.get_mut(sid) {
                sub.in_flight = false;
                return;
            }
        }
    }
}

/// Construit la requête NOTIFY d'un événement.
fn notify_request(callback: &Url, sid: &str, event: &PendingEvent) -> HttpRequest {
    request_for("NOTIFY", callback)
        .with_header("CONTENT-TYPE", CONTENT_TYPE_XML)
        .with_header("NT", NT_EVENT)
        .with_header("NTS", NTS_PROPCHANGE)
        .with_header("SID", sid)
        .with_header("SEQ", event.seq.to_string())
        .with_body(event.body.clone().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gena::GenaTimeout;
    use crate::http::{HttpHandler, HttpResponse, HttpServer};
    use crossbeam_channel::{unbounded, Sender};
    use std::net::SocketAddr;

    /// Récepteur NOTIFY : pousse (SEQ, corps) dans un canal.
    struct NotifySink(Sender<(u32, String)>);

    impl HttpHandler for NotifySink {
        fn handle(
            &self,
            _peer: SocketAddr,
            request: &HttpRequest,
        ) -> Result<HttpResponse, UpnpError> {
            assert_eq!(request.method, "NOTIFY");
            assert_eq!(request.headers.get("NT"), Some(NT_EVENT));
            assert_eq!(request.headers.get("NTS"), Some(NTS_PROPCHANGE));
            let seq: u32 = request.headers.get("SEQ").unwrap().parse().unwrap();
            let body = String::from_utf8(request.body.clone()).unwrap();
            self.0.send((seq, body)).unwrap();
            Ok(HttpResponse::ok())
        }
    }

    fn subscribe_request(callback: &str) -> SubscribeRequest {
        SubscribeRequest {
            sid: None,
            nt: Some(NT_EVENT.to_string()),
            callback: Some(format!("<{callback}>")),
            timeout: Some(GenaTimeout::Seconds(1800)),
            statevars: None,
        }
    }

    #[test]
    fn initial_event_then_ordered_notifications() {
        let (tx, rx) = unbounded();
        let sink = HttpServer::start(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(NotifySink(tx)),
            2,
            Duration::from_secs(5),
        )
        .unwrap();
        let callback = format!("http://{}/evt/switch", sink.local_addr());

        let engine = EventEngine::start(HttpClient::new(2));
        engine.register_service("/device/x/SwitchPower/event");

        let ack = engine
            .subscribe(
                "/device/x/SwitchPower/event",
                &subscribe_request(&callback),
                &[("Status".to_string(), "0".to_string())],
            )
            .unwrap();
        assert!(ack.sid.starts_with("uuid:"));

        // L'événement initial porte toutes les variables, SEQ=0.
        let (seq, body) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seq, 0);
        assert!(body.contains("<Status>0</Status>"));

        // Changement : SEQ suivant, variable changée seulement.
        engine.publish(
            "/device/x/SwitchPower/event",
            &[("Status".to_string(), "1".to_string())],
        );
        let (seq, body) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seq, 1);
        assert!(body.contains("<Status>1</Status>"));

        engine.shutdown();
        sink.stop();
    }

    #[test]
    fn unknown_service_is_not_found() {
        let engine = EventEngine::start(HttpClient::new(1));
        let result = engine.subscribe("/nope", &subscribe_request("http://127.0.0.1:1/x"), &[]);
        assert!(matches!(result, Err(UpnpError::ResourceNotFound(_))));
        engine.shutdown();
    }

    #[test]
    fn failed_delivery_drops_the_event_but_keeps_the_subscription() {
        let engine = EventEngine::start(HttpClient::new(1));
        engine.register_service("/evt");

        // Callback injoignable (port fermé).
        let ack = engine
            .subscribe(
                "/evt",
                &subscribe_request("http://127.0.0.1:1/evt"),
                &[("Status".to_string(), "0".to_string())],
            )
            .unwrap();

        // Laisse la livraison échouer, puis vérifie que la souscription
        // est toujours là (renouvellement accepté).
        thread::sleep(Duration::from_millis(600));
        let renewed = engine.services.lock().unwrap().get_mut("/evt").map(|t| {
            t.renew(&ack.sid, None, Instant::now()).is_ok()
        });
        assert_eq!(renewed, Some(true));
        engine.shutdown();
    }
}
