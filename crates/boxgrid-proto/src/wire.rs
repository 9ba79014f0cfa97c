//! Payload encodings for the structured message kinds.
//!
//! Fixed-width numbers are host order like the record header. Dynamic
//! fields (names, the environment/mounts/network blobs) are length-prefixed
//! byte strings; an empty string stands for an absent optional field.

use bytes::{Buf, BufMut};

use boxgrid_core::{ContainerRecord, ContainerSpec, ContainerState, ResourceSample};

use crate::ProtoError;

/// Encoded size of a resource sample: three f64 fields plus two u32 counts.
pub const SAMPLE_SIZE: usize = 3 * 8 + 2 * 4;

// ── Resource sample ─────────────────────────────────────────────────

pub fn encode_sample(sample: &ResourceSample) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SAMPLE_SIZE);
    buf.put_f64_ne(sample.cpu_pct);
    buf.put_f64_ne(sample.memory_pct);
    buf.put_f64_ne(sample.disk_pct);
    buf.put_u32_ne(sample.container_count);
    buf.put_u32_ne(sample.max_containers);
    buf
}

pub fn decode_sample(payload: &[u8]) -> Result<ResourceSample, ProtoError> {
    if payload.len() < SAMPLE_SIZE {
        return Err(ProtoError::Payload("resource sample"));
    }
    let mut buf = payload;
    Ok(ResourceSample {
        cpu_pct: buf.get_f64_ne(),
        memory_pct: buf.get_f64_ne(),
        disk_pct: buf.get_f64_ne(),
        container_count: buf.get_u32_ne(),
        max_containers: buf.get_u32_ne(),
    })
}

// ── Container spec ──────────────────────────────────────────────────

pub fn encode_spec(spec: &ContainerSpec) -> Vec<u8> {
    let mut buf = Vec::new();
    put_str(&mut buf, &spec.name);
    put_str(&mut buf, &spec.image);
    put_str(&mut buf, &spec.config_file);
    buf.put_u32_ne(spec.cpu_limit);
    buf.put_u32_ne(spec.memory_limit);
    buf.put_u8(spec.privileged as u8);
    put_opt_str(&mut buf, spec.environment.as_deref());
    put_opt_str(&mut buf, spec.mounts.as_deref());
    put_opt_str(&mut buf, spec.network.as_deref());
    buf
}

pub fn decode_spec(payload: &[u8]) -> Result<ContainerSpec, ProtoError> {
    let mut buf = payload;
    let spec = ContainerSpec {
        name: get_str(&mut buf, "container spec")?,
        image: get_str(&mut buf, "container spec")?,
        config_file: get_str(&mut buf, "container spec")?,
        cpu_limit: get_u32(&mut buf, "container spec")?,
        memory_limit: get_u32(&mut buf, "container spec")?,
        privileged: get_u8(&mut buf, "container spec")? != 0,
        environment: get_opt_str(&mut buf, "container spec")?,
        mounts: get_opt_str(&mut buf, "container spec")?,
        network: get_opt_str(&mut buf, "container spec")?,
    };
    Ok(spec)
}

// ── Container record ────────────────────────────────────────────────

pub fn encode_container(record: &ContainerRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    put_str(&mut buf, &record.id);
    put_str(&mut buf, &record.name);
    put_str(&mut buf, &record.worker_id);
    buf.put_u32_ne(record.state.to_wire());
    buf.put_u64_ne(record.created_at);
    buf.put_u64_ne(record.started_at);
    buf.extend_from_slice(&encode_spec(&record.spec));
    buf
}

pub fn decode_container(payload: &[u8]) -> Result<ContainerRecord, ProtoError> {
    let mut buf = payload;
    let id = get_str(&mut buf, "container record")?;
    let name = get_str(&mut buf, "container record")?;
    let worker_id = get_str(&mut buf, "container record")?;
    let state = ContainerState::from_wire(get_u32(&mut buf, "container record")?)
        .ok_or(ProtoError::Payload("container record"))?;
    let created_at = get_u64(&mut buf, "container record")?;
    let started_at = get_u64(&mut buf, "container record")?;
    let spec = decode_spec(buf)?;
    Ok(ContainerRecord {
        id,
        name,
        worker_id,
        state,
        spec,
        created_at,
        started_at,
    })
}

// ── Primitives ──────────────────────────────────────────────────────

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32_ne(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_opt_str(buf: &mut Vec<u8>, s: Option<&str>) {
    put_str(buf, s.unwrap_or(""));
}

fn get_u8(buf: &mut &[u8], what: &'static str) -> Result<u8, ProtoError> {
    if buf.remaining() < 1 {
        return Err(ProtoError::Payload(what));
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8], what: &'static str) -> Result<u32, ProtoError> {
    if buf.remaining() < 4 {
        return Err(ProtoError::Payload(what));
    }
    Ok(buf.get_u32_ne())
}

fn get_u64(buf: &mut &[u8], what: &'static str) -> Result<u64, ProtoError> {
    if buf.remaining() < 8 {
        return Err(ProtoError::Payload(what));
    }
    Ok(buf.get_u64_ne())
}

fn get_str(buf: &mut &[u8], what: &'static str) -> Result<String, ProtoError> {
    let len = get_u32(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(ProtoError::Payload(what));
    }
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Ok(s)
}

fn get_opt_str(buf: &mut &[u8], what: &'static str) -> Result<Option<String>, ProtoError> {
    let s = get_str(buf, what)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}
