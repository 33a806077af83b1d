use std::io::{Read, Write};

use sigweave_frame::{FrameReader, FrameWriter, Hello};

use crate::error::{LinkError, Result};

/// Exchange hellos and check that both ends agree on topic and family.
///
/// Each side writes its hello before reading the peer's, so neither end
/// waits on the other. On a mismatch both sides see the same pair of hellos
/// and both refuse.
pub fn exchange_hello<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    local: &Hello,
) -> Result<Hello> {
    writer.write_hello(local)?;
    let remote = reader.read_hello()?;

    if remote.family != local.family {
        return Err(LinkError::FamilyMismatch {
            local: local.family,
            remote: remote.family,
        });
    }
    if remote.topic != local.topic {
        return Err(LinkError::TopicMismatch {
            local: local.topic.clone(),
            remote: remote.topic,
        });
    }

    tracing::debug!(
        topic = %remote.topic,
        family = ?remote.family,
        peer_order = ?remote.order,
        "handshake complete"
    );
    Ok(remote)
}
