//! Index provisioning for calculated channels.
//!
//! Calculated channels need a timestamp index. When a new calculated channel
//! arrives without one, a companion index named `<name>_time` is appended to
//! the batch, and after keys are assigned the pair is linked by name.

use crate::channel::Channel;
use crate::channel::DataType;
use crate::cluster::NodeKey;
use crate::constants::CALCULATED_INDEX_SUFFIX;
use crate::error::ChannelError;
use crate::error::Result;

/// Data type of an index channel.
pub const INDEX_DATA_TYPE: DataType = DataType::Timestamp;

/// Name of the index provisioned for a calculated channel.
pub fn index_name(name: &str) -> String {
    format!("{name}{CALCULATED_INDEX_SUFFIX}")
}

/// Reject new calculated channels that specify an index manually.
pub fn check_calculated(position: usize, channel: &Channel) -> Result<()> {
    if channel.is_calculated() && channel.local_key == 0 && channel.local_index != 0 {
        return Err(ChannelError::ManualIndexOnCalculated {
            path: format!("channels[{position}].local_index"),
            name: channel.name.clone(),
        });
    }
    Ok(())
}

/// Append an index channel for every new calculated channel.
pub fn provision(mut channels: Vec<Channel>) -> Vec<Channel> {
    let indexes: Vec<Channel> = channels
        .iter()
        .filter(|ch| ch.is_calculated() && ch.local_key == 0)
        .map(|ch| Channel {
            leaseholder: NodeKey::FREE,
            is_virtual: true,
            data_type: INDEX_DATA_TYPE,
            is_internal: ch.is_internal,
            ..Channel::new_index(index_name(&ch.name))
        })
        .collect();
    channels.extend(indexes);
    channels
}

/// Point every unlinked calculated channel at its `<name>_time` index when
/// that index is part of the batch and has a key.
///
/// Returns the batch together with the positions of the channels linked.
pub fn link(mut channels: Vec<Channel>) -> (Vec<Channel>, Vec<usize>) {
    let mut linked = Vec::new();
    for i in 0..channels.len() {
        let ch = &channels[i];
        if !ch.is_calculated() || ch.local_index != 0 {
            continue;
        }
        let wanted = index_name(&ch.name);
        let found = channels
            .iter()
            .find(|c| c.is_index && c.local_key != 0 && c.name == wanted && c.leaseholder == ch.leaseholder)
            .map(|c| c.local_key);
        if let Some(local_index) = found {
            channels[i].local_index = local_index;
            linked.push(i);
        }
    }
    (channels, linked)
}
