//! AWS CLI backed inventory and metadata lookups

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::selector::{Instance, InstanceMetadata, InstancePool, LoadBalancerInventory};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeLoadBalancers {
    #[serde(default)]
    load_balancer_descriptions: Vec<LoadBalancerDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoadBalancerDescription {
    #[serde(default)]
    instances: Vec<LoadBalancerInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoadBalancerInstance {
    instance_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    public_ip_address: Option<String>,
    public_dns_name: Option<String>,
}

/// Parse `aws elb describe-load-balancers` output
pub fn parse_load_balancer(pool: &str, json: &str) -> Result<InstancePool> {
    let response: DescribeLoadBalancers = serde_json::from_str(json)
        .map_err(|e| SyncError::discovery(pool, format!("malformed response: {}", e)))?;

    let description = response
        .load_balancer_descriptions
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::discovery(pool, "no load balancer description returned"))?;

    Ok(InstancePool {
        name: pool.to_string(),
        instances: description
            .instances
            .into_iter()
            .map(|i| Instance::new(i.instance_id))
            .collect(),
    })
}

/// Parse `aws ec2 describe-instances` output into the instance's public address
///
/// The public IP is preferred; the public DNS name is used when no IP is
/// reported. Both are empty while an instance is still provisioning.
pub fn parse_public_address(instance_id: &str, json: &str) -> Result<String> {
    let response: DescribeInstances = serde_json::from_str(json)
        .map_err(|e| SyncError::resolution(instance_id, format!("malformed response: {}", e)))?;

    let instance = response
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .find(|i| i.instance_id == instance_id)
        .ok_or_else(|| SyncError::resolution(instance_id, "instance not found"))?;

    [instance.public_ip_address, instance.public_dns_name]
        .into_iter()
        .flatten()
        .find(|address| !address.is_empty())
        .ok_or_else(|| SyncError::resolution(instance_id, "no public address assigned"))
}

/// Shells out to the `aws` command line tool
#[derive(Debug, Clone)]
pub struct AwsCli {
    binary: String,
    region: Option<String>,
}

impl AwsCli {
    pub fn new(region: Option<String>) -> Self {
        Self {
            binary: "aws".to_string(),
            region,
        }
    }

    /// Use a different `aws` executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run(&self, args: &[&str]) -> std::result::Result<String, String> {
        let mut command = Command::new(&self.binary);
        command.args(args).args(["--output", "json"]);
        if let Some(region) = &self.region {
            command.arg("--region").arg(region);
        }
        debug!(binary = %self.binary, ?args, "Running aws command");

        let output = command
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| format!("non UTF-8 output: {}", e))
    }
}

#[async_trait]
impl LoadBalancerInventory for AwsCli {
    async fn list_instances(&self, pool: &str) -> Result<InstancePool> {
        let json = self
            .run(&["elb", "describe-load-balancers", "--load-balancer-names", pool])
            .await
            .map_err(|message| SyncError::discovery(pool, message))?;
        parse_load_balancer(pool, &json)
    }
}

#[async_trait]
impl InstanceMetadata for AwsCli {
    async fn resolve_address(&self, instance_id: &str) -> Result<String> {
        let json = self
            .run(&["ec2", "describe-instances", "--instance-ids", instance_id])
            .await
            .map_err(|message| SyncError::resolution(instance_id, message))?;
        parse_public_address(instance_id, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_balancer() {
        let json = r#"{
            "LoadBalancerDescriptions": [{
                "LoadBalancerName": "vulcan",
                "Instances": [{"InstanceId": "i-0a"}, {"InstanceId": "i-0b"}]
            }]
        }"#;
        let pool = parse_load_balancer("vulcan", json).unwrap();
        assert_eq!(pool.name, "vulcan");
        assert_eq!(
            pool.instances,
            vec![Instance::new("i-0a"), Instance::new("i-0b")]
        );
    }

    #[test]
    fn test_parse_load_balancer_without_instances() {
        let json = r#"{"LoadBalancerDescriptions": [{"LoadBalancerName": "vulcan"}]}"#;
        let pool = parse_load_balancer("vulcan", json).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_parse_load_balancer_missing_description() {
        let json = r#"{"LoadBalancerDescriptions": []}"#;
        let err = parse_load_balancer("vulcan", json).unwrap_err();
        assert!(matches!(err, SyncError::Discovery { .. }));

        let err = parse_load_balancer("vulcan", "<html>").unwrap_err();
        assert!(matches!(err, SyncError::Discovery { .. }));
    }

    #[test]
    fn test_parse_public_address_prefers_ip() {
        let json = r#"{"Reservations": [{"Instances": [{
            "InstanceId": "i-0a",
            "PublicIpAddress": "203.0.113.7",
            "PublicDnsName": "ec2-203-0-113-7.compute.amazonaws.com"
        }]}]}"#;
        assert_eq!(parse_public_address("i-0a", json).unwrap(), "203.0.113.7");
    }

    #[test]
    fn test_parse_public_address_falls_back_to_dns() {
        let json = r#"{"Reservations": [{"Instances": [{
            "InstanceId": "i-0a",
            "PublicDnsName": "ec2-203-0-113-7.compute.amazonaws.com"
        }]}]}"#;
        assert_eq!(
            parse_public_address("i-0a", json).unwrap(),
            "ec2-203-0-113-7.compute.amazonaws.com"
        );
    }

    #[test]
    fn test_parse_public_address_provisioning() {
        let json = r#"{"Reservations": [{"Instances": [{
            "InstanceId": "i-0a",
            "PublicDnsName": ""
        }]}]}"#;
        let err = parse_public_address("i-0a", json).unwrap_err();
        assert!(err.to_string().contains("no public address"));
    }

    #[test]
    fn test_parse_public_address_unknown_instance() {
        let err = parse_public_address("i-0a", r#"{"Reservations": []}"#).unwrap_err();
        assert!(err.to_string().contains("instance not found"));
    }
}
