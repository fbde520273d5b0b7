//! # Module Types - Identifiants UPnP
//!
//! Ce module implémente les identifiants du fil UPnP et leurs règles de
//! comparaison :
//!
//! - [`ResourceType`] : type de device/service (`urn:domaine:kind:nom:version`)
//!   avec la règle de compatibilité descendante des versions ;
//! - [`Udn`] : Unique Device Name (`uuid:…`) ;
//! - [`DiscoveryType`] : variante taguée projetée en USN/NT sur le fil ;
//! - [`SearchTarget`] : cible ST d'un M-SEARCH (`ssdp:all` inclus) ;
//! - [`ProductTokens`] : jetons SERVER/USER-AGENT (`OS/ver UPnP/1.x produit/ver`).

mod discovery_type;
mod product_tokens;
mod resource_type;
mod udn;

pub use discovery_type::{DiscoveryType, SearchTarget};
pub use product_tokens::{ProductToken, ProductTokens};
pub use resource_type::{ResourceKind, ResourceType};
pub use udn::Udn;
