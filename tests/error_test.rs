use queue_workers::QueueWorkerError;

#[test]
fn test_error_types() {
    let err = QueueWorkerError::ItemNotFound("test-id".to_string());
    assert_eq!(err.to_string(), "Queue item not found: test-id");

    let err = QueueWorkerError::LeaseHeld("test-id".to_string());
    assert_eq!(err.to_string(), "Lease already held for item: test-id");

    let err = QueueWorkerError::TenantNotFound(7);
    assert_eq!(err.to_string(), "Tenant not found for namespace: 7");

    let err = QueueWorkerError::TaskFailed("forced worker stop 0".to_string());
    assert_eq!(err.to_string(), "Task failed: forced worker stop 0");
}
