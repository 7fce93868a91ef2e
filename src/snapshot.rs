//! Headerless binary snapshot of a voxel set.
//!
//! Each voxel is one little-endian record:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 12 | position, 3 x f32 |
//! | 12 | 12 | scale, 3 x f32 |
//! | 24 | 8 | density, i64 |
use bevy::{log, math::Vec3};

use crate::{error::DecodeError, voxel::Voxel};

/// Size of one encoded voxel in bytes.
pub const RECORD_SIZE: usize = 32;

/// Encodes voxels in iteration order.
pub fn encode<'a, I>(voxels: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Voxel>,
{
    let voxels = voxels.into_iter();
    let mut bytes = Vec::with_capacity(voxels.size_hint().0 * RECORD_SIZE);

    for voxel in voxels {
        write_vec3(&mut bytes, voxel.position());
        write_vec3(&mut bytes, voxel.scale());
        bytes.extend_from_slice(&i64::from(voxel.density()).to_le_bytes());
    }

    bytes
}

/// Decodes a snapshot produced by [`encode`].
///
/// The whole input is rejected if its length is not a whole number of records or if any
/// record holds a non-finite value, a non-positive scale or a density below 1.
pub fn decode(bytes: &[u8]) -> Result<Vec<Voxel>, DecodeError> {
    if bytes.len() % RECORD_SIZE != 0 {
        log::warn!("Rejecting snapshot of {} bytes", bytes.len());
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            record_size: RECORD_SIZE,
        });
    }

    bytes
        .chunks_exact(RECORD_SIZE)
        .enumerate()
        .map(|(record, chunk)| decode_record(record, chunk))
        .collect()
}

fn decode_record(record: usize, chunk: &[u8]) -> Result<Voxel, DecodeError> {
    let position = read_vec3(&chunk[0..12]);
    let scale = read_vec3(&chunk[12..24]);
    let density = i64::from_le_bytes([
        chunk[24], chunk[25], chunk[26], chunk[27], chunk[28], chunk[29], chunk[30], chunk[31],
    ]);

    if !position.is_finite() {
        return Err(DecodeError::NonFiniteField {
            record,
            field: "position",
        });
    }

    if !scale.is_finite() {
        return Err(DecodeError::NonFiniteField {
            record,
            field: "scale",
        });
    }

    if scale.min_element() <= 0.0 {
        return Err(DecodeError::InvalidScale { record });
    }

    if density < 1 {
        return Err(DecodeError::InvalidDensity { record, density });
    }

    let density = u32::try_from(density).unwrap_or(u32::MAX);
    Ok(Voxel::from_parts(position, scale, density))
}

fn write_vec3(bytes: &mut Vec<u8>, v: Vec3) {
    bytes.extend_from_slice(&v.x.to_le_bytes());
    bytes.extend_from_slice(&v.y.to_le_bytes());
    bytes.extend_from_slice(&v.z.to_le_bytes());
}

fn read_vec3(buf: &[u8]) -> Vec3 {
    let x = f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let y = f32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let z = f32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    Vec3::new(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: Vec3, scale: Vec3, density: i64) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_vec3(&mut bytes, position);
        write_vec3(&mut bytes, scale);
        bytes.extend_from_slice(&density.to_le_bytes());
        bytes
    }

    #[test]
    fn test_encode_layout() {
        let voxel = Voxel::from_parts(Vec3::new(0.5, -1.0, 2.0), Vec3::splat(10.0), 7);
        let bytes = encode([voxel].iter());

        assert_eq!(bytes.len(), RECORD_SIZE);
        assert_eq!(bytes, record(Vec3::new(0.5, -1.0, 2.0), Vec3::splat(10.0), 7));
    }

    #[test]
    fn test_decode_keeps_order_and_density() {
        let voxels = vec![
            Voxel::from_parts(Vec3::new(0.1, 0.2, 0.3), Vec3::splat(10.0), 3),
            Voxel::from_parts(Vec3::new(-0.5, 0.0, 0.7), Vec3::splat(10.0), 1),
        ];

        let decoded = decode(&encode(voxels.iter())).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].key(), voxels[0].key());
        assert_eq!(decoded[0].density(), 3);
        assert_eq!(decoded[1].key(), voxels[1].key());
        assert_eq!(decoded[1].density(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(decode(&[]).unwrap().len(), 0);
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let mut bytes = record(Vec3::ZERO, Vec3::ONE, 1);
        bytes.extend_from_slice(&[0; 5]);

        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Truncated {
                len: RECORD_SIZE + 5,
                record_size: RECORD_SIZE
            })
        );
    }

    #[test]
    fn test_bad_records_rejected() {
        let mut bytes = record(Vec3::ZERO, Vec3::ONE, 1);
        bytes.extend(record(Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ONE, 1));
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::NonFiniteField {
                record: 1,
                field: "position"
            })
        );

        let bytes = record(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0), 1);
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidScale { record: 0 }));

        let bytes = record(Vec3::ZERO, Vec3::ONE, 0);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::InvalidDensity {
                record: 0,
                density: 0
            })
        );
    }

    #[test]
    fn test_large_density_saturates() {
        let bytes = record(Vec3::ZERO, Vec3::ONE, i64::MAX);
        assert_eq!(decode(&bytes).unwrap()[0].density(), u32::MAX);
    }
}
