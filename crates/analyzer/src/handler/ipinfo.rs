// Subnet attribute enrichment backed by two longest-prefix-match
// trees loaded from a GeoIP CSV at startup.

use std::net::IpAddr;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use dnspipe_common::event::{DnsEvent, IpInfo};
use dnspipe_common::netradix::NetRadixTree;

/// One row of the GeoIP CSV.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubnetRow {
    pub subnet: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub county: String,
    #[serde(default)]
    pub isp: String,
    #[serde(default)]
    pub dc: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub custom: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SubnetInfo {
    country: String,
    province: String,
    city: String,
    county: String,
    isp: String,
    dc: String,
    app: String,
    custom: String,
}

impl From<SubnetRow> for SubnetInfo {
    fn from(row: SubnetRow) -> Self {
        Self {
            country: row.country,
            province: row.province,
            city: row.city,
            county: row.county,
            isp: row.isp,
            dc: row.dc,
            app: row.app,
            custom: row.custom,
        }
    }
}

pub struct IpInfoHandler {
    tree4: NetRadixTree<SubnetInfo>,
    tree6: NetRadixTree<SubnetInfo>,
}

impl IpInfoHandler {
    /// Load the GeoIP CSV. Unreadable or malformed input is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let begin = Instant::now();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("open geoip file `{}`", path.display()))?;

        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: SubnetRow =
                record.with_context(|| format!("parse geoip file `{}`", path.display()))?;
            rows.push(row);
        }
        let handler = Self::from_rows(rows)?;
        info!(
            v4 = handler.tree4.len(),
            v6 = handler.tree6.len(),
            cost = ?begin.elapsed(),
            "load geoip file succeed"
        );
        Ok(handler)
    }

    /// Subnets containing a colon go to the v6 tree, everything else
    /// to the v4 tree. Both families are indexed.
    pub fn from_rows(rows: Vec<SubnetRow>) -> Result<Self> {
        let mut tree4 = NetRadixTree::new();
        let mut tree6 = NetRadixTree::new();
        for row in rows {
            let subnet = row.subnet.clone();
            let info = SubnetInfo::from(row);
            if subnet.contains(':') {
                tree6
                    .insert_cidr(&subnet, info)
                    .with_context(|| format!("add subnet `{subnet}`"))?;
            } else {
                tree4
                    .insert_cidr(&subnet, info)
                    .with_context(|| format!("add subnet `{subnet}`"))?;
            }
        }
        Ok(Self { tree4, tree6 })
    }

    pub fn handle(&self, mut event: DnsEvent) -> DnsEvent {
        if let Some(info) = self.search(event.source_ip) {
            event.source_ip_info = to_ip_info(event.source_ip.to_string(), info);
        }

        if !event.answer_ip.is_empty() {
            if let Ok(ip) = event.answer_ip.parse::<IpAddr>() {
                if let Some(info) = self.search(ip) {
                    event.answer_ip_info = to_ip_info(event.answer_ip.clone(), info);
                }
            }
        }

        if event.edns_client_subnet.is_empty() {
            return event;
        }
        let addr_part = event
            .edns_client_subnet
            .split('/')
            .next()
            .unwrap_or_default();
        if let Ok(ip) = addr_part.parse::<IpAddr>() {
            if let Some(info) = self.search(ip) {
                event.edns_client_subnet_info = to_ip_info(ip.to_string(), info);
            }
        }
        event
    }

    fn search(&self, ip: IpAddr) -> Option<&SubnetInfo> {
        match ip {
            IpAddr::V4(_) => self.tree4.search_best(ip),
            IpAddr::V6(_) => self.tree6.search_best(ip),
        }
    }
}

fn to_ip_info(ip: String, info: &SubnetInfo) -> IpInfo {
    IpInfo {
        ip,
        country: info.country.clone(),
        province: info.province.clone(),
        city: info.city.clone(),
        county: info.county.clone(),
        isp: info.isp.clone(),
        dc: info.dc.clone(),
        app: info.app.clone(),
        custom: info.custom.clone(),
    }
}
