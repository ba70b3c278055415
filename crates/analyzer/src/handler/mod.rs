// Middleware handlers and their dispatch.
//
// The handler set is closed and known at configuration time, so
// dispatch is a plain enum rather than trait objects. Each handler
// takes the event by value and returns it, keeping per-event mutation
// single-owner.

pub mod ipinfo;
pub mod session;
pub mod traffic_direction;
pub mod tunnel_sec;

use std::path::Path;

use anyhow::Result;

use dnspipe_common::event::DnsEvent;

use crate::config::{Config, MiddlewareKind};

pub use ipinfo::IpInfoHandler;
pub use session::SessionHandler;
pub use traffic_direction::TrafficDirectionHandler;
pub use tunnel_sec::TunnelSecHandler;

pub enum Middleware {
    Session(SessionHandler),
    IpInfo(IpInfoHandler),
    TunnelSec(TunnelSecHandler),
    TrafficDirection(TrafficDirectionHandler),
}

impl Middleware {
    pub fn handle(&self, event: DnsEvent) -> DnsEvent {
        match self {
            Middleware::Session(h) => h.handle(event),
            Middleware::IpInfo(h) => h.handle(event),
            Middleware::TunnelSec(h) => h.handle(event),
            Middleware::TrafficDirection(h) => h.handle(event),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Middleware::Session(_) => "session",
            Middleware::IpInfo(_) => "ipinfo",
            Middleware::TunnelSec(_) => "tunnel_sec",
            Middleware::TrafficDirection(_) => "traffic_direction",
        }
    }
}

/// Build the enabled middleware handlers in their configured order.
/// The ipinfo handler loads its GeoIP file here; load failures are
/// fatal to startup.
pub fn build_middlewares(cfg: &Config) -> Result<Vec<Middleware>> {
    let mut handlers = Vec::new();
    for kind in &cfg.middleware_handlers {
        match kind {
            MiddlewareKind::Session if cfg.session.enable => {
                handlers.push(Middleware::Session(SessionHandler::new(
                    cfg.session.session_cache_size,
                )));
            }
            MiddlewareKind::Ipinfo if cfg.ipinfo.enable => {
                handlers.push(Middleware::IpInfo(IpInfoHandler::load(Path::new(
                    &cfg.ipinfo.geoip_filename,
                ))?));
            }
            MiddlewareKind::TunnelSec if cfg.tunnel_sec.enable => {
                handlers.push(Middleware::TunnelSec(TunnelSecHandler::new(
                    &cfg.tunnel_sec.special_tlds,
                    cfg.tunnel_sec.enable_subdomain_entropy,
                    cfg.tunnel_sec.enable_subdomain_encoding_detect,
                    cfg.tunnel_sec.encoding_detect_least_label_length,
                )));
            }
            MiddlewareKind::TrafficDirection if cfg.traffic_direction.enable => {
                handlers.push(Middleware::TrafficDirection(TrafficDirectionHandler::new(
                    &cfg.traffic_direction.self_ips,
                )));
            }
            _ => {}
        }
    }
    Ok(handlers)
}
