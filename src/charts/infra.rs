//! Installation-derived values for the well-known infrastructure charts.

use std::net::Ipv4Addr;

use serde_json::{Map, Value, json};

use super::values;
use crate::controller::error::{Error, Result};
use crate::crd::{HelmChart, Installation, ProxySpec};

pub const ADMIN_CONSOLE_CHART: &str = "admin-console";
pub const OPERATOR_CHART: &str = "embedded-cluster-operator";
pub const VELERO_CHART: &str = "velero";
pub const DOCKER_REGISTRY_CHART: &str = "docker-registry";

/// Port of the seaweedfs S3 gateway.
const SEAWEEDFS_S3_PORT: u16 = 8333;

/// Offset of the seaweedfs S3 service address inside the service CIDR.
const SEAWEEDFS_S3_ADDRESS_OFFSET: u32 = 12;

/// Proxy variables in the order charts expect them.
fn proxy_vars(proxy: &ProxySpec) -> [(&'static str, &str); 3] {
    [
        ("HTTP_PROXY", proxy.http_proxy.as_str()),
        ("HTTPS_PROXY", proxy.https_proxy.as_str()),
        ("NO_PROXY", proxy.no_proxy.as_str()),
    ]
}

fn extra_env_list(proxy: &ProxySpec) -> Value {
    Value::Array(
        proxy_vars(proxy)
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect(),
    )
}

fn extra_env_map(proxy: &ProxySpec) -> Value {
    let map: Map<String, Value> = proxy_vars(proxy)
        .iter()
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();
    Value::Object(map)
}

/// Address of the seaweedfs S3 service: the service CIDR base plus a fixed offset.
pub fn seaweedfs_s3_endpoint(service_cidr: &str) -> Result<String> {
    let base = service_cidr.split('/').next().unwrap_or(service_cidr);
    let ip: Ipv4Addr = base
        .parse()
        .map_err(|e| Error::Validation(format!("invalid service CIDR {}: {}", service_cidr, e)))?;
    let address = u32::from(ip)
        .checked_add(SEAWEEDFS_S3_ADDRESS_OFFSET)
        .map(Ipv4Addr::from)
        .ok_or_else(|| Error::Validation(format!("service CIDR {} overflows", service_cidr)))?;
    Ok(format!("{}:{}", address, SEAWEEDFS_S3_PORT))
}

/// Inject cluster identity, mode flags and proxy settings into the charts
/// that consume them. Other charts are returned untouched.
pub fn update_infra_charts(
    installation: &Installation,
    service_cidr: &str,
    charts: Vec<HelmChart>,
) -> Result<Vec<HelmChart>> {
    let spec = &installation.spec;
    charts
        .into_iter()
        .map(|mut chart| {
            let mut doc = match chart.name.as_str() {
                ADMIN_CONSOLE_CHART | OPERATOR_CHART | VELERO_CHART => {
                    values::parse(&chart.values)?
                }
                DOCKER_REGISTRY_CHART if spec.air_gap && spec.high_availability => {
                    values::parse(&chart.values)?
                }
                _ => return Ok(chart),
            };

            match chart.name.as_str() {
                ADMIN_CONSOLE_CHART => {
                    doc.insert("embeddedClusterID".to_string(), json!(spec.cluster_id));
                    // The console expects a string here
                    doc.insert("isAirgap".to_string(), json!(spec.air_gap.to_string()));
                    doc.insert("isHA".to_string(), json!(spec.high_availability));
                    if let Some(proxy) = &spec.proxy {
                        doc.insert("extraEnv".to_string(), extra_env_list(proxy));
                    }
                }
                OPERATOR_CHART => {
                    doc.insert("embeddedBinaryName".to_string(), json!(spec.binary_name));
                    doc.insert("embeddedClusterID".to_string(), json!(spec.cluster_id));
                    if let Some(proxy) = &spec.proxy {
                        doc.insert("extraEnv".to_string(), extra_env_list(proxy));
                    }
                }
                VELERO_CHART => {
                    if let Some(proxy) = &spec.proxy {
                        values::set_path(
                            &mut doc,
                            "configuration.extraEnvVars",
                            extra_env_map(proxy),
                        );
                    }
                }
                DOCKER_REGISTRY_CHART => {
                    let endpoint = seaweedfs_s3_endpoint(service_cidr)?;
                    values::set_path(&mut doc, "s3.regionEndpoint", json!(endpoint));
                }
                _ => {}
            }

            chart.values = values::render(&doc)?;
            Ok(chart)
        })
        .collect()
}
