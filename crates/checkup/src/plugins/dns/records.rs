//! Presentation of resource record data.

use hickory_proto::rr::RData;

use crate::net::trim_root_dot;

/// Render record data as text, names without the root dot
pub fn format_rdata(rdata: &RData) -> String {
    match rdata {
        RData::A(a) => a.to_string(),
        RData::AAAA(aaaa) => aaaa.to_string(),
        RData::MX(mx) => format!("{} {}", mx.preference(), name(&mx.exchange().to_string())),
        RData::CNAME(cname) => name(&cname.to_string()),
        RData::NS(ns) => name(&ns.to_string()),
        RData::PTR(ptr) => name(&ptr.to_string()),
        RData::TXT(txt) => txt.txt_data().iter().map(|part| String::from_utf8_lossy(part)).collect(),
        RData::SOA(soa) => format!(
            "{} {} {} {} {} {} {}",
            name(&soa.mname().to_string()),
            name(&soa.rname().to_string()),
            soa.serial(),
            soa.refresh(),
            soa.retry(),
            soa.expire(),
            soa.minimum()
        ),
        RData::SRV(srv) => format!(
            "{} {} {} {}",
            srv.priority(),
            srv.weight(),
            srv.port(),
            name(&srv.target().to_string())
        ),
        other => other.to_string(),
    }
}

fn name(value: &str) -> String {
    trim_root_dot(value).to_string()
}

/// Split an MX answer into `(preference, exchange)`
pub fn parse_mx(record: &str) -> Option<(u16, String)> {
    let (preference, exchange) = record.trim().split_once(' ')?;
    Some((preference.parse().ok()?, trim_root_dot(exchange.trim()).to_string()))
}
