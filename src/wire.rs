//! Versioned wire encoding for [`crate::aggregator::NodeInfo`]: the
//! packed form exchanged with a remote consumer. Decoding accepts every
//! protocol version this crate has ever emitted; encoding only emits the
//! current one, matching how the original plugin's `pack`/`unpack` pair
//! behaves across a protocol bump.

use crate::error::{CoreError, CoreResult};

/// Current on-wire format: `u16 alloc_cpus, u64 alloc_memory, string
/// tres_alloc_fmt_str, f64 tres_alloc_weighted`.
pub const WIRE_VERSION_CURRENT: u16 = 2;

/// Legacy format predating `tres_alloc_weighted`: `u16 alloc_cpus, u64
/// alloc_memory, string tres_alloc_fmt_str`.
pub const WIRE_VERSION_LEGACY_V1: u16 = 1;

/// Decoded form of a packed node info record.
#[derive(Debug, Clone, PartialEq)]
pub struct WireNodeInfo {
    pub alloc_cpus: u16,
    pub alloc_memory: u64,
    pub tres_alloc_fmt_str: String,
    pub tres_alloc_weighted: f64,
}

/// Packs `info` in [`WIRE_VERSION_CURRENT`] format, version-prefixed.
pub fn pack_nodeinfo(info: &WireNodeInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&WIRE_VERSION_CURRENT.to_be_bytes());
    buf.extend_from_slice(&info.alloc_cpus.to_be_bytes());
    buf.extend_from_slice(&info.alloc_memory.to_be_bytes());
    pack_string(&mut buf, &info.tres_alloc_fmt_str);
    buf.extend_from_slice(&info.tres_alloc_weighted.to_be_bytes());
    buf
}

fn pack_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Cursor over a packed byte buffer with bounds-checked reads, mirroring
/// the original plugin's `unpack_*` helpers operating on a `Buf_t`.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(CoreError::BadArgument(
                "truncated nodeinfo wire buffer".to_string(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> CoreResult<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> CoreResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CoreError::BadArgument(format!("non-utf8 string in nodeinfo buffer: {e}")))
    }
}

/// Unpacks a version-prefixed buffer, dispatching on the embedded
/// version so any format this crate has ever emitted still decodes.
pub fn unpack_nodeinfo(buf: &[u8]) -> CoreResult<WireNodeInfo> {
    let mut r = Reader::new(buf);
    let version = r.read_u16()?;
    match version {
        WIRE_VERSION_CURRENT => {
            let alloc_cpus = r.read_u16()?;
            let alloc_memory = r.read_u64()?;
            let tres_alloc_fmt_str = r.read_string()?;
            let tres_alloc_weighted = r.read_f64()?;
            Ok(WireNodeInfo {
                alloc_cpus,
                alloc_memory,
                tres_alloc_fmt_str,
                tres_alloc_weighted,
            })
        }
        WIRE_VERSION_LEGACY_V1 => {
            let alloc_cpus = r.read_u16()?;
            let alloc_memory = r.read_u64()?;
            let tres_alloc_fmt_str = r.read_string()?;
            Ok(WireNodeInfo {
                alloc_cpus,
                alloc_memory,
                tres_alloc_fmt_str,
                tres_alloc_weighted: alloc_cpus as f64,
            })
        }
        other => Err(CoreError::BadArgument(format!(
            "unsupported nodeinfo wire version {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let info = WireNodeInfo {
            alloc_cpus: 12,
            alloc_memory: 4_096,
            tres_alloc_fmt_str: "cpu=12,mem=4096".to_string(),
            tres_alloc_weighted: 12.5,
        };
        let packed = pack_nodeinfo(&info);
        let unpacked = unpack_nodeinfo(&packed).unwrap();
        assert_eq!(unpacked, info);
    }

    #[test]
    fn test_unpack_legacy_v1_fills_default_weighted() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&WIRE_VERSION_LEGACY_V1.to_be_bytes());
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.extend_from_slice(&1_000u64.to_be_bytes());
        pack_string(&mut buf, "cpu=8,mem=1000");

        let unpacked = unpack_nodeinfo(&buf).unwrap();
        assert_eq!(unpacked.alloc_cpus, 8);
        assert_eq!(unpacked.tres_alloc_weighted, 8.0);
    }

    #[test]
    fn test_unpack_rejects_unknown_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99u16.to_be_bytes());
        let err = unpack_nodeinfo(&buf).unwrap_err();
        assert!(matches!(err, CoreError::BadArgument(_)));
    }

    #[test]
    fn test_unpack_rejects_truncated_buffer() {
        let buf = WIRE_VERSION_CURRENT.to_be_bytes().to_vec();
        let err = unpack_nodeinfo(&buf).unwrap_err();
        assert!(matches!(err, CoreError::BadArgument(_)));
    }
}
