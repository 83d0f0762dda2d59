#[cfg(test)]
/// # Panics
/// Panics if the result is `Ok` (operation succeeded when error was expected).
pub fn assert_error_code<T: std::fmt::Debug>(
    result: crate::QueueResult<T>,
    expected_code: &str,
) {
    match result {
        Err(e) => {
            assert_eq!(
                e.code(),
                expected_code,
                "Expected error code {expected_code}, got {}: {e}",
                e.code()
            );
        }
        Ok(v) => {
            panic!("Expected error with code {expected_code}, but operation succeeded with {v:?}");
        }
    }
}

#[cfg(test)]
/// # Panics
/// Panics if the result is `Ok` (operation succeeded when error was expected).
pub fn assert_error_contains<T: std::fmt::Debug>(
    result: crate::QueueResult<T>,
    expected_substring: &str,
) {
    match result {
        Err(e) => {
            let message = e.to_string();
            assert!(
                message.contains(expected_substring),
                "Error message '{message}' does not contain '{expected_substring}'"
            );
        }
        Ok(v) => {
            panic!("Expected error containing '{expected_substring}', but operation succeeded with {v:?}");
        }
    }
}
