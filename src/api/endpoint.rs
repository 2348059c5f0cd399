use std::fmt;

/// Device endpoints consumed by the reader. All are read-only GETs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Combined production + consumption JSON (Envoy S)
    ProductionJson,
    /// Single-object production JSON (Envoy C)
    ApiV1Production,
    /// Per-inverter records, digest authenticated
    ApiV1Inverters,
    /// Legacy status page
    ProductionHtml,
    InfoXml,
}

impl EndpointKind {
    pub fn path(self) -> &'static str {
        match self {
            EndpointKind::ProductionJson => "/production.json",
            EndpointKind::ApiV1Production => "/api/v1/production",
            EndpointKind::ApiV1Inverters => "/api/v1/production/inverters",
            EndpointKind::ProductionHtml => "/production",
            EndpointKind::InfoXml => "/info.xml",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
