use taskcal::calendar::CalendarError;
use taskcal::error::{exit_codes, Error, JsonError};

#[test]
fn exit_codes_map_correctly() {
    let user = Error::MissingReference("rowIndex".to_string());
    assert_eq!(user.exit_code(), exit_codes::USER_ERROR);

    let conflict = Error::VersionConflict {
        row: 2,
        expected: 1,
        stored: 3,
    };
    assert_eq!(conflict.exit_code(), exit_codes::CONFLICT);

    let op = Error::CollaboratorTimeout(250);
    assert_eq!(op.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn json_error_carries_kind_and_details() {
    let err = Error::invalid_field("Start Date", "expected a date");
    let json = JsonError::from(&err);
    assert_eq!(json.status, "error");
    assert_eq!(json.kind, "invalid_field");
    assert!(json.message.contains("Start Date"));
    let details = json.details.expect("details");
    assert_eq!(details["field"], "Start Date");
}

#[test]
fn calendar_errors_convert() {
    let err: Error = CalendarError::NotFound("evt1".to_string()).into();
    assert_eq!(err.kind(), "stale_external_reference");

    let err: Error = CalendarError::Unavailable("down".to_string()).into();
    assert_eq!(err.kind(), "collaborator_unavailable");
    assert!(err.details().is_none());
}
