//! GENA subscription proxy (control-point side).
//!
//! One HTTP listener receives every NOTIFY; a worker thread owns the
//! subscription state: it subscribes, renews at half-life, validates
//! SEQ continuity and recovers from lost events by re-subscribing.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};
use url::Url;

use domoupnp::errors::UpnpError;
use domoupnp::gena::{parse_property_set, GenaTimeout, NT_EVENT};
use domoupnp::http::{
    endpoint_of, request_for, HttpClient, HttpHandler, HttpRequest, HttpResponse, HttpServer,
    DEFAULT_DEADLINE, DEFAULT_KEEP_ALIVE,
};
use domoupnp::types::Udn;

use crate::events::EventBus;

/// Worker loop cadence.
const WORKER_TICK: Duration = Duration::from_millis(250);

/// What the proxy reports to API consumers.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// A NOTIFY carrying state-variable changes was accepted.
    Notification {
        udn: Udn,
        service_id: String,
        seq: u32,
        changes: Vec<(String, String)>,
    },
    /// Events were lost (SEQ gap); the proxy re-subscribed for a fresh
    /// full state.
    Resubscribed { udn: Udn, service_id: String },
    /// The subscription could not be established or renewed.
    Lost { udn: Udn, service_id: String },
}

/// A NOTIFY as it arrived on the callback listener.
struct IncomingNotify {
    path: String,
    sid: Option<String>,
    seq: Option<u32>,
    body: Vec<u8>,
}

/// Routes NOTIFY requests into the worker channel.
struct NotifyListener {
    tx: Sender<IncomingNotify>,
}

impl HttpHandler for NotifyListener {
    fn handle(&self, _peer: SocketAddr, request: &HttpRequest) -> Result<HttpResponse, UpnpError> {
        if request.method != "NOTIFY" {
            return Ok(HttpResponse::new(405));
        }
        let notify = IncomingNotify {
            path: request.target.clone(),
            sid: request.headers.get("SID").map(str::to_string),
            seq: request.headers.get("SEQ").and_then(|s| s.trim().parse().ok()),
            body: request.body.clone(),
        };
        if self.tx.send(notify).is_err() {
            warn!("Dropping NOTIFY: subscription worker is gone");
        }
        Ok(HttpResponse::ok())
    }
}

/// Client-side state of one subscription.
struct ClientSubscription {
    udn: Udn,
    service_id: String,
    event_sub_url: Url,
    callback_path: String,
    sid: Option<String>,
    timeout_secs: u32,
    expires_at: Instant,
    /// Last SEQ accepted; None right after (re-)subscribing, when only
    /// the initial SEQ=0 event is acceptable.
    last_seq: Option<u32>,
}

impl ClientSubscription {
    fn expected_seq(&self) -> u32 {
        match self.last_seq {
            None => 0,
            Some(u32::MAX) => 1,
            Some(n) => n + 1,
        }
    }

    fn due_for_renewal(&self, now: Instant) -> bool {
        // Renewal at half-life: expiry minus timeout/2.
        let half = Duration::from_secs(u64::from(self.timeout_secs) / 2);
        self.sid.is_some() && now + half >= self.expires_at
    }
}

/// The subscription proxy.
pub struct EventProxy {
    listener: HttpServer,
    client: HttpClient,
    bus: EventBus<SubscriptionEvent>,
    subs: Arc<Mutex<HashMap<String, ClientSubscription>>>,
    callback_ip: IpAddr,
    next_path: AtomicU64,
    running: Arc<AtomicBool>,
}

impl EventProxy {
    /// Binds the callback listener and starts the worker loop.
    pub fn start(
        client: HttpClient,
        bus: EventBus<SubscriptionEvent>,
    ) -> Result<Arc<Self>, UpnpError> {
        let (tx, rx) = unbounded::<IncomingNotify>();
        let listener = HttpServer::start(
            "0.0.0.0:0".parse().expect("static address parses"),
            Arc::new(NotifyListener { tx }),
            8,
            DEFAULT_KEEP_ALIVE,
        )
        .map_err(|e| UpnpError::TransportError(format!("cannot bind notify listener: {e}")))?;

        info!("✅ Event listener bound on {}", listener.local_addr());

        let proxy = Arc::new(Self {
            listener,
            client,
            bus,
            subs: Arc::new(Mutex::new(HashMap::new())),
            callback_ip: IpAddr::V4(domoutils::guess_local_ip()),
            next_path: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(true)),
        });

        let worker = Arc::clone(&proxy);
        thread::Builder::new()
            .name("event-proxy".into())
            .spawn(move || {
                while worker.running.load(Ordering::SeqCst) {
                    worker.drain_notifications(&rx);
                    worker.renew_expiring();
                    thread::sleep(WORKER_TICK);
                }
            })
            .map_err(|e| UpnpError::Internal(format!("cannot spawn event worker: {e}")))?;

        Ok(proxy)
    }

    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let paths: Vec<String> = self.subs.lock().unwrap().keys().cloned().collect();
        for path in paths {
            self.cancel(&path);
        }
        self.listener.stop();
    }

    /// Subscribes to a service's events; notifications surface on the
    /// bus passed at construction.
    pub fn subscribe(
        &self,
        udn: &Udn,
        service_id: &str,
        event_sub_url: &Url,
    ) -> Result<(), UpnpError> {
        let callback_path = format!("/evt/{}", self.next_path.fetch_add(1, Ordering::SeqCst));

        let mut subscription = ClientSubscription {
            udn: udn.clone(),
            service_id: service_id.to_string(),
            event_sub_url: event_sub_url.clone(),
            callback_path: callback_path.clone(),
            sid: None,
            timeout_secs: 1800,
            expires_at: Instant::now(),
            last_seq: None,
        };
        self.do_subscribe(&mut subscription)?;

        self.subs
            .lock()
            .unwrap()
            .insert(callback_path, subscription);
        Ok(())
    }

    /// Cancels the subscription bound to a callback path.
    fn cancel(&self, callback_path: &str) {
        let removed = self.subs.lock().unwrap().remove(callback_path);
        if let Some(sub) = removed {
            if let Some(sid) = &sub.sid {
                let _ = self.send_unsubscribe(&sub.event_sub_url, sid);
            }
        }
    }

    /// Cancels every subscription of a device (used when it goes away).
    pub fn cancel_device(&self, udn: &Udn) {
        let paths: Vec<String> = self
            .subs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| &s.udn == udn)
            .map(|(p, _)| p.clone())
            .collect();
        for path in paths {
            self.cancel(&path);
        }
    }

    fn callback_url(&self, path: &str) -> String {
        format!(
            "http://{}:{}{}",
            self.callback_ip,
            self.listener.local_addr().port(),
            path
        )
    }

    /// SUBSCRIBE on the wire; stores SID/timeout on success.
    fn do_subscribe(&self, sub: &mut ClientSubscription) -> Result<(), UpnpError> {
        let endpoint = endpoint_of(&sub.event_sub_url).ok_or_else(|| {
            UpnpError::TransportError(format!("cannot resolve {}", sub.event_sub_url))
        })?;

        let request = request_for("SUBSCRIBE", &sub.event_sub_url)
            .with_header("NT", NT_EVENT)
            .with_header("CALLBACK", format!("<{}>", self.callback_url(&sub.callback_path)))
            .with_header("TIMEOUT", GenaTimeout::Seconds(1800).to_string());

        let response = self.client.send(endpoint, request, DEFAULT_DEADLINE)?;
        if !response.is_success() {
            return Err(UpnpError::PreconditionFailed(format!(
                "SUBSCRIBE to {} answered {}",
                sub.event_sub_url, response.status
            )));
        }

        let sid = response
            .headers
            .get("SID")
            .ok_or_else(|| {
                UpnpError::MalformedMessage("SUBSCRIBE response without SID".to_string())
            })?
            .to_string();
        let timeout: GenaTimeout = response
            .headers
            .get("TIMEOUT")
            .unwrap_or("Second-1800")
            .parse()?;
        let timeout_secs = match timeout {
            GenaTimeout::Seconds(n) => n,
            GenaTimeout::Infinite => 1800,
        };

        debug!(
            sid = sid.as_str(),
            service = sub.service_id.as_str(),
            "Subscribed to events"
        );

        sub.sid = Some(sid);
        sub.timeout_secs = timeout_secs.max(1);
        sub.expires_at = Instant::now() + Duration::from_secs(u64::from(sub.timeout_secs));
        sub.last_seq = None;
        Ok(())
    }

    fn send_renew(&self, sub: &mut ClientSubscription) -> Result<(), UpnpError> {
        let sid = sub
            .sid
            .clone()
            .ok_or_else(|| UpnpError::PreconditionFailed("renewal without SID".to_string()))?;
        let endpoint = endpoint_of(&sub.event_sub_url).ok_or_else(|| {
            UpnpError::TransportError(format!("cannot resolve {}", sub.event_sub_url))
        })?;

        let request = request_for("SUBSCRIBE", &sub.event_sub_url)
            .with_header("SID", sid)
            .with_header("TIMEOUT", GenaTimeout::Seconds(sub.timeout_secs).to_string());

        let response = self.client.send(endpoint, request, DEFAULT_DEADLINE)?;
        if !response.is_success() {
            return Err(UpnpError::PreconditionFailed(format!(
                "renewal answered {}",
                response.status
            )));
        }
        sub.expires_at = Instant::now() + Duration::from_secs(u64::from(sub.timeout_secs));
        Ok(())
    }

    fn send_unsubscribe(&self, event_sub_url: &Url, sid: &str) -> Result<(), UpnpError> {
        let endpoint = endpoint_of(event_sub_url).ok_or_else(|| {
            UpnpError::TransportError(format!("cannot resolve {event_sub_url}"))
        })?;
        let request = request_for("UNSUBSCRIBE", event_sub_url).with_header("SID", sid);
        self.client.send(endpoint, request, DEFAULT_DEADLINE)?;
        Ok(())
    }

    fn drain_notifications(&self, rx: &Receiver<IncomingNotify>) {
        while let Ok(notify) = rx.try_recv() {
            self.handle_notification(notify);
        }
    }

    /// Validates SID and SEQ continuity, then surfaces the changes.
    ///
    /// A SEQ regression or a gap means events were lost: tear down and
    /// re-subscribe to recover the full state via a fresh initial
    /// event.
    fn handle_notification(&self, notify: IncomingNotify) {
        let mut subs = self.subs.lock().unwrap();
        let Some(sub) = subs.get_mut(&notify.path) else {
            debug!("NOTIFY for unknown callback path {}", notify.path);
            return;
        };

        let sid_ok = match (&notify.sid, &sub.sid) {
            (Some(received), Some(expected)) => received.eq_ignore_ascii_case(expected),
            _ => false,
        };
        if !sid_ok {
            debug!("NOTIFY with unknown SID on {}", notify.path);
            return;
        }

        let Some(seq) = notify.seq else {
            debug!("NOTIFY without SEQ on {}", notify.path);
            return;
        };

        if seq != sub.expected_seq() {
            warn!(
                "SEQ discontinuity on {} (expected {}, got {}), re-subscribing",
                sub.service_id,
                sub.expected_seq(),
                seq
            );
            let event = SubscriptionEvent::Resubscribed {
                udn: sub.udn.clone(),
                service_id: sub.service_id.clone(),
            };
            if let Some(sid) = sub.sid.take() {
                let _ = self.send_unsubscribe(&sub.event_sub_url, &sid);
            }
            match self.do_subscribe(sub) {
                Ok(()) => self.bus.broadcast(event),
                Err(e) => {
                    warn!("Re-subscription failed for {}: {}", sub.service_id, e);
                    self.bus.broadcast(SubscriptionEvent::Lost {
                        udn: sub.udn.clone(),
                        service_id: sub.service_id.clone(),
                    });
                }
            }
            return;
        }

        let changes = match parse_property_set(&notify.body) {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Invalid event body on {}: {}", sub.service_id, e);
                return;
            }
        };

        sub.last_seq = Some(seq);
        self.bus.broadcast(SubscriptionEvent::Notification {
            udn: sub.udn.clone(),
            service_id: sub.service_id.clone(),
            seq,
            changes,
        });
    }

    fn renew_expiring(&self) {
        let now = Instant::now();
        let mut subs = self.subs.lock().unwrap();
        for sub in subs.values_mut() {
            if !sub.due_for_renewal(now) {
                continue;
            }
            if let Err(e) = self.send_renew(sub) {
                warn!("Renewal failed for {}: {}", sub.service_id, e);
                // Renewal failed: try a clean re-subscription.
                if self.do_subscribe(sub).is_err() {
                    self.bus.broadcast(SubscriptionEvent::Lost {
                        udn: sub.udn.clone(),
                        service_id: sub.service_id.clone(),
                    });
                }
            }
        }
    }
}

impl Drop for EventProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}
