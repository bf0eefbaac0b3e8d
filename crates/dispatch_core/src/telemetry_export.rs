use std::error::Error;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array, UInt64Array, UInt8Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::agents::TaxiStatus;
use crate::telemetry::{DispatchSnapshot, SnapshotHistory};

/// One row per checkpoint: fleet breakdown and cumulative request outcomes.
pub fn write_snapshot_history_parquet<P: AsRef<Path>>(
    path: P,
    history: &SnapshotHistory,
) -> Result<(), Box<dyn Error>> {
    let mut taken_at = Vec::with_capacity(history.len());
    let mut taxis_free = Vec::with_capacity(history.len());
    let mut taxis_en_route = Vec::with_capacity(history.len());
    let mut taxis_off_duty = Vec::with_capacity(history.len());
    let mut taxis_unknown = Vec::with_capacity(history.len());
    let mut assigned = Vec::with_capacity(history.len());
    let mut completed = Vec::with_capacity(history.len());
    let mut rejected = Vec::with_capacity(history.len());
    let mut timed_out = Vec::with_capacity(history.len());
    let mut pending_requests = Vec::with_capacity(history.len());

    for summary in history.iter() {
        taken_at.push(summary.taken_at);
        taxis_free.push(summary.fleet.free as u64);
        taxis_en_route.push(summary.fleet.en_route as u64);
        taxis_off_duty.push(summary.fleet.off_duty as u64);
        taxis_unknown.push(summary.fleet.unknown as u64);
        assigned.push(summary.counts.assigned);
        completed.push(summary.counts.completed);
        rejected.push(summary.counts.rejected);
        timed_out.push(summary.counts.timed_out);
        pending_requests.push(summary.pending_requests as u64);
    }

    let schema = Schema::new(vec![
        Field::new("taken_at", DataType::UInt64, false),
        Field::new("taxis_free", DataType::UInt64, false),
        Field::new("taxis_en_route", DataType::UInt64, false),
        Field::new("taxis_off_duty", DataType::UInt64, false),
        Field::new("taxis_unknown", DataType::UInt64, false),
        Field::new("assigned", DataType::UInt64, false),
        Field::new("completed", DataType::UInt64, false),
        Field::new("rejected", DataType::UInt64, false),
        Field::new("timed_out", DataType::UInt64, false),
        Field::new("pending_requests", DataType::UInt64, false),
    ]);

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(taken_at)),
        Arc::new(UInt64Array::from(taxis_free)),
        Arc::new(UInt64Array::from(taxis_en_route)),
        Arc::new(UInt64Array::from(taxis_off_duty)),
        Arc::new(UInt64Array::from(taxis_unknown)),
        Arc::new(UInt64Array::from(assigned)),
        Arc::new(UInt64Array::from(completed)),
        Arc::new(UInt64Array::from(rejected)),
        Arc::new(UInt64Array::from(timed_out)),
        Arc::new(UInt64Array::from(pending_requests)),
    ];

    write_record_batch(path, schema, arrays)
}

/// One row per taxi in a single checkpoint.
pub fn write_fleet_parquet<P: AsRef<Path>>(
    path: P,
    snapshot: &DispatchSnapshot,
) -> Result<(), Box<dyn Error>> {
    let mut taxi_id = Vec::with_capacity(snapshot.taxis.len());
    let mut x = Vec::with_capacity(snapshot.taxis.len());
    let mut y = Vec::with_capacity(snapshot.taxis.len());
    let mut speed = Vec::with_capacity(snapshot.taxis.len());
    let mut status = Vec::with_capacity(snapshot.taxis.len());
    let mut last_update = Vec::with_capacity(snapshot.taxis.len());
    let mut services_completed = Vec::with_capacity(snapshot.taxis.len());

    for entry in &snapshot.taxis {
        taxi_id.push(entry.taxi.id);
        x.push(entry.taxi.position.x);
        y.push(entry.taxi.position.y);
        speed.push(u8::from(entry.taxi.speed));
        status.push(status_code(entry.status));
        last_update.push(entry.taxi.last_update);
        services_completed.push(entry.taxi.services_completed);
    }

    let schema = Schema::new(vec![
        Field::new("taxi_id", DataType::UInt32, false),
        Field::new("x", DataType::UInt32, false),
        Field::new("y", DataType::UInt32, false),
        Field::new("speed", DataType::UInt8, false),
        Field::new("status", DataType::UInt8, false),
        Field::new("last_update", DataType::UInt64, false),
        Field::new("services_completed", DataType::UInt32, false),
    ]);

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from(taxi_id)),
        Arc::new(UInt32Array::from(x)),
        Arc::new(UInt32Array::from(y)),
        Arc::new(UInt8Array::from(speed)),
        Arc::new(UInt8Array::from(status)),
        Arc::new(UInt64Array::from(last_update)),
        Arc::new(UInt32Array::from(services_completed)),
    ];

    write_record_batch(path, schema, arrays)
}

fn write_record_batch<P: AsRef<Path>>(
    path: P,
    schema: Schema,
    arrays: Vec<ArrayRef>,
) -> Result<(), Box<dyn Error>> {
    let schema = Arc::new(schema);
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn status_code(status: TaxiStatus) -> u8 {
    match status {
        TaxiStatus::Free => 0,
        TaxiStatus::EnRoute => 1,
        TaxiStatus::OffDuty => 2,
        TaxiStatus::Unknown => 3,
    }
}
