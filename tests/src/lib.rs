//! Integration tests for `avatar-stream` live in `tests/`.
