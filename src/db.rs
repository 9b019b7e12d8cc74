use rusqlite::Connection;
use std::path::Path;

pub fn open_db(db_path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            last_login TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            roll_number TEXT,
            department TEXT,
            year TEXT,
            current_semester TEXT,
            academic_year TEXT,
            email TEXT,
            phone TEXT,
            gender TEXT,
            address TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department_year ON students(department, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            user_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            department TEXT,
            designation TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_department ON teachers(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            hour INTEGER NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, subject, date, hour),
            FOREIGN KEY(student_id) REFERENCES students(user_id),
            FOREIGN KEY(marked_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leaves(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            rejection_reason TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaves_student ON leaves(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaves_status ON leaves(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            student_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            total_fee REAL NOT NULL,
            paid REAL NOT NULL,
            balance REAL NOT NULL,
            status TEXT NOT NULL,
            due_date TEXT NOT NULL,
            last_payment_date TEXT,
            PRIMARY KEY(student_id, semester, academic_year),
            FOREIGN KEY(student_id) REFERENCES students(user_id)
        )",
        [],
    )?;
    ensure_fees_payment_reference(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            student_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            subject_name TEXT,
            cia_marks REAL NOT NULL,
            semester_marks REAL NOT NULL,
            total_marks REAL NOT NULL,
            grade TEXT NOT NULL,
            result_status TEXT NOT NULL,
            PRIMARY KEY(student_id, semester, academic_year, subject_code),
            FOREIGN KEY(student_id) REFERENCES students(user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            posted_by TEXT NOT NULL,
            target_department TEXT,
            target_year TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(posted_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_active ON announcements(is_active)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable(
            department TEXT NOT NULL,
            year TEXT NOT NULL,
            day TEXT NOT NULL,
            period INTEGER NOT NULL,
            subject TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            room TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            PRIMARY KEY(department, year, day, period),
            FOREIGN KEY(teacher_id) REFERENCES teachers(user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_teacher ON timetable(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            subject_code TEXT NOT NULL,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT,
            department TEXT NOT NULL,
            year TEXT NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            venue TEXT,
            duration_minutes INTEGER,
            max_marks REAL,
            exam_type TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_class ON exams(department, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback_sessions(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL,
            created_by TEXT NOT NULL,
            department TEXT,
            year TEXT,
            semester TEXT,
            academic_year TEXT,
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            rating INTEGER NOT NULL,
            comments TEXT,
            submitted_at TEXT NOT NULL,
            UNIQUE(session_id, student_id, teacher_id, subject),
            FOREIGN KEY(session_id) REFERENCES feedback_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(user_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_feedback_session ON feedback(session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_events(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            title TEXT NOT NULL,
            event_type TEXT NOT NULL,
            description TEXT,
            created_by TEXT NOT NULL,
            department TEXT,
            year TEXT,
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_calendar_events_date ON calendar_events(date)",
        [],
    )?;

    Ok(conn)
}

// Earlier databases predate payment references on fee rows. Add the column
// when missing; existing rows keep NULL.
fn ensure_fees_payment_reference(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "fees", "payment_reference")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE fees ADD COLUMN payment_reference TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
