//! Binary snapshot save/load for the HNSW engine.
//!
//! Field order: metric, data type, dimension, worker count, max elements,
//! snapshot id, level-0 offset, current element count, per-element size,
//! label offset, data offset, max level, entry point, M, Mmax0, growth
//! factor, ef_construction; then the base-layer region as one record per
//! node (`[header+slots | vector | label]`); then per node a 32-bit
//! upper-level byte length followed by that many bytes. Every field is
//! little-endian, so the format is stable across hosts. A mismatch between
//! the computed byte positions and the file size fails the load as corrupt.

use crate::config::{CoreConfig, DataType, HnswParams, IndexConfig, MetricType};
use crate::error::{IndexError, Result};
use crate::hnsw::graph::HnswIndex;
use crate::pod;
use crate::LabelType;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

/// Fixed header: 5 u32 fields, 6 u64 fields, i32 max level, u32 entry
/// point, 2 u64 degree fields, f64 mult, u64 ef_construction.
const HEADER_BYTES: u64 = 5 * 4 + 6 * 8 + 4 + 4 + 2 * 8 + 8 + 8;

impl HnswIndex {
    /// Write the whole index to `path`, recording `snapshot_id`.
    ///
    /// The caller must quiesce writers for the duration; concurrent
    /// searches are harmless.
    pub fn save(&self, snapshot_id: u64, path: &Path) -> Result<()> {
        self.set_snapshot_id(snapshot_id);
        let core = self.core_config();
        let cur = self.element_count();
        let (entry, max_level) = self
            .entry_point()
            .map_or((u32::MAX, -1), |(loc, level)| (loc, level));

        let data_size = self.space.data_size();
        let links0_bytes = (1 + self.max_m0) * 4;
        let size_per_element = links0_bytes + data_size + std::mem::size_of::<LabelType>();
        let data_offset = links0_bytes;
        let label_offset = links0_bytes + data_size;

        let mut w = BufWriter::new(File::create(path)?);
        pod::write_u32(&mut w, core.metric.code())?;
        pod::write_u32(&mut w, core.data_type.code())?;
        pod::write_u32(&mut w, core.dimension)?;
        pod::write_u32(&mut w, core.worker_num)?;
        pod::write_u32(&mut w, core.max_elements)?;
        pod::write_u64(&mut w, snapshot_id)?;
        pod::write_u64(&mut w, 0)?; // level-0 region offset
        pod::write_u64(&mut w, cur as u64)?;
        pod::write_u64(&mut w, size_per_element as u64)?;
        pod::write_u64(&mut w, label_offset as u64)?;
        pod::write_u64(&mut w, data_offset as u64)?;
        pod::write_i32(&mut w, max_level)?;
        pod::write_u32(&mut w, entry)?;
        pod::write_u64(&mut w, self.m as u64)?;
        pod::write_u64(&mut w, self.max_m0 as u64)?;
        pod::write_f64(&mut w, self.mult)?;
        pod::write_u64(&mut w, self.ef_construction as u64)?;

        // Base-layer region: one contiguous record per node.
        for loc in 0..cur as u32 {
            for word in self.level0_block(loc) {
                pod::write_u32(&mut w, word.load(Ordering::Acquire))?;
            }
            w.write_all(self.vector(loc))?;
            pod::write_u64(&mut w, self.label(loc))?;
        }

        // Upper-level region: byte length, then the list words.
        let words_per_level = 1 + self.max_m;
        for loc in 0..cur as u32 {
            let level = self.element_level(loc);
            let byte_len = if level > 0 {
                (level as usize * words_per_level * 4) as u32
            } else {
                0
            };
            pod::write_u32(&mut w, byte_len)?;
            for l in 1..=level.max(0) as usize {
                for word in self.upper_block(loc, l)? {
                    pod::write_u32(&mut w, word.load(Ordering::Acquire))?;
                }
            }
        }
        w.flush()?;
        tracing::info!(
            elements = cur,
            snapshot_id,
            path = %path.display(),
            "saved hnsw snapshot"
        );
        Ok(())
    }

    /// Load a snapshot written by [`HnswIndex::save`].
    ///
    /// `config.core.max_elements` grows the loaded index when it exceeds
    /// the stored element count; the stored graph parameters win otherwise.
    pub fn load(path: &Path, config: &IndexConfig) -> Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        let mut r = BufReader::new(file);

        let metric = MetricType::from_code(pod::read_u32(&mut r)?)
            .ok_or_else(|| IndexError::Internal("snapshot has an unknown metric".into()))?;
        let data_type = DataType::from_code(pod::read_u32(&mut r)?)
            .ok_or_else(|| IndexError::Internal("snapshot has an unknown data type".into()))?;
        let dimension = pod::read_u32(&mut r)?;
        let worker_num = pod::read_u32(&mut r)?;
        let file_max_elements = pod::read_u32(&mut r)?;
        let snapshot_id = pod::read_u64(&mut r)?;
        let offset_level0 = pod::read_u64(&mut r)?;
        let cur = pod::read_u64(&mut r)? as usize;
        let size_per_element = pod::read_u64(&mut r)? as usize;
        let label_offset = pod::read_u64(&mut r)? as usize;
        let data_offset = pod::read_u64(&mut r)? as usize;
        let max_level = pod::read_i32(&mut r)?;
        let entry = pod::read_u32(&mut r)?;
        let m = pod::read_u64(&mut r)? as usize;
        let max_m0 = pod::read_u64(&mut r)? as usize;
        let mult = pod::read_f64(&mut r)?;
        let ef_construction = pod::read_u64(&mut r)? as usize;

        if offset_level0 != 0 {
            return Err(IndexError::Internal(
                "snapshot uses an unsupported level-0 offset".into(),
            ));
        }
        if max_m0 != m.saturating_mul(2) {
            return Err(IndexError::Internal(
                "snapshot degree caps are inconsistent".into(),
            ));
        }
        let data_size = dimension as usize * data_type.size();
        let links0_bytes = (1 + max_m0) * 4;
        if data_offset != links0_bytes
            || label_offset != links0_bytes + data_size
            || size_per_element != links0_bytes + data_size + std::mem::size_of::<LabelType>()
        {
            return Err(IndexError::Internal(
                "snapshot layout offsets do not match its dimension".into(),
            ));
        }

        let mut max_elements = config.core.max_elements as usize;
        if max_elements < cur || max_elements == 0 {
            max_elements = (file_max_elements as usize).max(cur).max(1);
        }
        let core = CoreConfig {
            index: crate::config::IndexKind::Hnsw,
            data_type,
            metric,
            dimension,
            worker_num,
            max_elements: max_elements as u32,
        };
        let params = HnswParams {
            m,
            ef_construction,
            ..config.hnsw
        };
        let mut idx = HnswIndex::new(core, params)?;
        idx.mult = mult;
        idx.set_snapshot_id(snapshot_id);
        idx.set_element_count(cur as u32);
        if entry != u32::MAX {
            if entry as usize >= cur {
                return Err(IndexError::Internal(
                    "snapshot entry point is outside the element range".into(),
                ));
            }
            idx.publish_entry_point(entry, max_level);
        }

        // Base-layer region.
        let mut consumed = HEADER_BYTES;
        let mut vector_buf = vec![0u8; data_size];
        {
            let mut lookup = idx.label_lookup.lock();
            for loc in 0..cur as u32 {
                for word in idx.level0_block(loc) {
                    word.store(pod::read_u32(&mut r)?, Ordering::Relaxed);
                }
                r.read_exact(&mut vector_buf)?;
                // Exclusive: the index is not shared yet.
                unsafe {
                    idx.vectors.write_row(loc, &vector_buf);
                }
                let label = pod::read_u64(&mut r)?;
                idx.set_label(loc, label);
                lookup.insert(label, loc);
                consumed += size_per_element as u64;
            }
        }

        // Upper-level region.
        let words_per_level = 1 + m;
        let level_bytes = words_per_level * 4;
        for loc in 0..cur as u32 {
            let byte_len = pod::read_u32(&mut r)? as usize;
            consumed += 4;
            if byte_len == 0 {
                idx.set_element_level(loc, 0);
                continue;
            }
            if byte_len % level_bytes != 0 {
                return Err(IndexError::Internal(
                    "snapshot upper-level block has a fractional level".into(),
                ));
            }
            let level = byte_len / level_bytes;
            idx.set_element_level(loc, level as i32);
            idx.allocate_upper_block(loc, level)?;
            for l in 1..=level {
                for word in idx.upper_block(loc, l)? {
                    word.store(pod::read_u32(&mut r)?, Ordering::Relaxed);
                }
            }
            consumed += byte_len as u64;
        }

        if consumed != total {
            return Err(IndexError::Internal(
                "snapshot appears to be corrupted or truncated".into(),
            ));
        }

        idx.rebuild_deletion_bookkeeping();
        tracing::info!(
            elements = cur,
            snapshot_id,
            deleted = idx.deleted_count(),
            "loaded hnsw snapshot"
        );
        Ok(idx)
    }
}
