//! Snapshot streams piped through netcat by the helper script

use crate::error::{Result, ZfsError};
use crate::runner::{ZfsCommand, ZFS};
use crate::zfs::{VolumeReceive, VolumeSend};

/// Script that runs its arguments as one shell pipeline
pub const PIPELINE_HELPER: &str = "/usr/local/bin/execute.sh";

const NC_TIMEOUT_SECS: &str = "3";

/// Split a `host:port` endpoint
pub fn split_endpoint(endpoint: &str) -> Result<(String, String)> {
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok((host.to_string(), port.to_string()))
        }
        _ => Err(ZfsError::missing_field("pipeline", "endpoint as host:port")),
    }
}

/// `zfs send ... | nc -w 3 <host> <port>`
#[derive(Debug, Clone)]
pub struct SendPipeline {
    pub send: VolumeSend,
    pub endpoint: String,
}

impl SendPipeline {
    pub fn new(send: VolumeSend, endpoint: impl Into<String>) -> Self {
        Self {
            send,
            endpoint: endpoint.into(),
        }
    }
}

impl ZfsCommand for SendPipeline {
    fn program(&self) -> &'static str {
        PIPELINE_HELPER
    }

    fn build(&self) -> Result<Vec<String>> {
        let (host, port) = split_endpoint(&self.endpoint)?;
        let mut args = vec![ZFS.to_string()];
        args.extend(self.send.build()?);
        args.extend(["|", "nc", "-w", NC_TIMEOUT_SECS].map(String::from));
        args.push(host);
        args.push(port);
        Ok(args)
    }
}

/// `nc -w 3 <host> <port> | zfs recv ...`
#[derive(Debug, Clone)]
pub struct ReceivePipeline {
    pub receive: VolumeReceive,
    pub endpoint: String,
}

impl ReceivePipeline {
    pub fn new(receive: VolumeReceive, endpoint: impl Into<String>) -> Self {
        Self {
            receive,
            endpoint: endpoint.into(),
        }
    }
}

impl ZfsCommand for ReceivePipeline {
    fn program(&self) -> &'static str {
        PIPELINE_HELPER
    }

    fn build(&self) -> Result<Vec<String>> {
        let (host, port) = split_endpoint(&self.endpoint)?;
        let mut args: Vec<String> = ["nc", "-w", NC_TIMEOUT_SECS].map(String::from).to_vec();
        args.push(host);
        args.push(port);
        args.push("|".to_string());
        args.push(ZFS.to_string());
        args.extend(self.receive.build()?);
        Ok(args)
    }
}
