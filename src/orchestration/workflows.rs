//! Built-in workflow definitions.

use super::types::{StepAction, StepDefinition, StepError, WorkflowContext, WorkflowDefinition};
use crate::gateway::GatewayRequest;
use serde_json::{json, Value};
use tracing::info;

pub const APPOINTMENT_BOOKING: &str = "appointment_booking";

pub mod steps {
    pub const FETCH_LATEST_READING: &str = "fetch_latest_reading";
    pub const CREATE_APPOINTMENT: &str = "create_appointment";
    pub const SUBMIT_TO_QUEUE: &str = "submit_to_queue";
    pub const RECORD_ANALYTICS: &str = "record_analytics";
}

/// Book an appointment with the latest glucose reading attached.
///
/// Input: `{"appointment": {"date": ..., "reason": ...}}`. The created
/// appointment is cancelled and the queue submission withdrawn if a later
/// critical step fails.
pub fn appointment_booking() -> WorkflowDefinition {
    WorkflowDefinition::new(APPOINTMENT_BOOKING)
        .step(
            StepDefinition::new(
                steps::FETCH_LATEST_READING,
                StepAction::endpoint("glucose.latest"),
            )
            .max_retries(1),
        )
        .step(
            StepDefinition::new(
                steps::CREATE_APPOINTMENT,
                StepAction::endpoint_with("appointments.create", create_appointment_request),
            )
            .max_retries(2)
            .compensate(StepAction::endpoint_with(
                "appointments.cancel",
                appointment_id_request,
            )),
        )
        .step(
            StepDefinition::new(
                steps::SUBMIT_TO_QUEUE,
                StepAction::endpoint_with("appointments.submit", |_| {
                    Ok(GatewayRequest::new().body(json!({})))
                }),
            )
            .max_retries(2)
            .compensate(StepAction::endpoint("appointments.withdraw")),
        )
        .step(
            StepDefinition::new(
                steps::RECORD_ANALYTICS,
                StepAction::inline(record_booking_analytics),
            )
            .critical(false),
        )
}

fn create_appointment_request(ctx: &WorkflowContext) -> Result<GatewayRequest, StepError> {
    let mut body = ctx
        .lookup("/appointment")
        .cloned()
        .ok_or_else(|| StepError::Permanent("input is missing 'appointment'".to_string()))?;

    if let (Value::Object(fields), Some(reading)) =
        (&mut body, ctx.result(steps::FETCH_LATEST_READING))
    {
        fields.insert("glucose_reading".to_string(), reading.clone());
    }
    Ok(GatewayRequest::new().body(body))
}

fn appointment_id_request(ctx: &WorkflowContext) -> Result<GatewayRequest, StepError> {
    let pointer = format!("/{}/id", steps::CREATE_APPOINTMENT);
    let id = match ctx.lookup(&pointer) {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(StepError::Permanent(
                "created appointment has no id".to_string(),
            ))
        }
    };
    Ok(GatewayRequest::new().param("appointment_id", id))
}

async fn record_booking_analytics(ctx: WorkflowContext) -> Result<Value, StepError> {
    let appointment_id = ctx
        .lookup(&format!("/{}/id", steps::CREATE_APPOINTMENT))
        .cloned()
        .unwrap_or(Value::Null);
    info!(appointment_id = %appointment_id, "📊 Appointment booked");
    Ok(json!({ "event": "appointment_booked", "appointment_id": appointment_id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appointment_booking_shape() {
        let def = appointment_booking();
        let names: Vec<&str> = def.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                steps::FETCH_LATEST_READING,
                steps::CREATE_APPOINTMENT,
                steps::SUBMIT_TO_QUEUE,
                steps::RECORD_ANALYTICS
            ]
        );
        assert!(def.steps[..3].iter().all(|s| s.critical));
        assert!(!def.steps[3].critical);
        assert!(def.steps[0].compensate.is_none());
        assert_eq!(
            def.steps[1].compensate.as_ref().and_then(|a| a.endpoint_key()),
            Some("appointments.cancel")
        );
    }

    #[test]
    fn test_create_request_attaches_reading() {
        let mut ctx = WorkflowContext::new(json!({"appointment": {"reason": "Checkup"}}));
        ctx.record(steps::FETCH_LATEST_READING, json!({"glucose_mg_dl": 110}));

        let request = create_appointment_request(&ctx).unwrap();
        assert_eq!(
            request.body,
            Some(json!({"reason": "Checkup", "glucose_reading": {"glucose_mg_dl": 110}}))
        );
    }

    #[test]
    fn test_create_request_requires_appointment_input() {
        let ctx = WorkflowContext::new(json!({}));
        assert!(matches!(
            create_appointment_request(&ctx),
            Err(StepError::Permanent(_))
        ));
    }

    #[test]
    fn test_cancel_request_uses_created_id() {
        let mut ctx = WorkflowContext::new(json!({}));
        ctx.record(steps::CREATE_APPOINTMENT, json!({"id": 42}));

        let request = appointment_id_request(&ctx).unwrap();
        assert_eq!(request.params.get("appointment_id").map(String::as_str), Some("42"));
    }
}
