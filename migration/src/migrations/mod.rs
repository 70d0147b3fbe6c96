pub mod m202608050001_create_attendance_sessions;
pub mod m202608050002_create_attendance_records;
pub mod m202608050003_create_attendance_audit;
