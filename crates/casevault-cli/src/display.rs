//! Human-readable output for the CaseVault CLI

use casevault_types::{
    BackupLog, BackupTask, ClassificationReport, DiskStatus, HardDisk, LogStatus,
    MigrationReport, TaskProgress, TaskStatus,
};
use chrono::{DateTime, Local, Utc};
use console::{style, StyledObject};
use std::collections::BTreeMap;

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Parse `4096`, `500M`, `2G`, `1.5T` and the like into bytes
pub fn parse_size(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => return Err(format!("unknown size unit '{}'", other)),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}'", input))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid size '{}'", input));
    }
    Ok((value * multiplier as f64).round() as u64)
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn task_status(status: TaskStatus) -> StyledObject<TaskStatus> {
    match status {
        TaskStatus::Completed => style(status).green(),
        TaskStatus::Running | TaskStatus::Pending => style(status).cyan(),
        TaskStatus::Paused | TaskStatus::PartiallyFailed => style(status).yellow(),
        TaskStatus::Failed | TaskStatus::Canceled => style(status).red(),
    }
}

fn log_status(status: LogStatus) -> StyledObject<LogStatus> {
    match status {
        LogStatus::Success => style(status).green(),
        LogStatus::Running => style(status).cyan(),
        LogStatus::Paused | LogStatus::Interrupted => style(status).yellow(),
        LogStatus::Failed | LogStatus::Canceled => style(status).red(),
    }
}

/// Display one task in detail
pub fn print_task(task: &BackupTask) {
    println!();
    println!("{}", style(format!("Task {}", task.id)).bold().underlined());
    println!("  Status: {}", task_status(task.status));
    println!("  Source: {}", style(task.source_path.display()).cyan());
    println!(
        "  Target: {} / {}",
        style(&task.target_disk_id).cyan(),
        style(&task.target_path).cyan()
    );
    println!("  Mode: {:?}", task.backup_mode);
    println!(
        "  Progress: {:.1}% ({} of {})",
        task.progress_percent(),
        format_bytes(task.completed_size),
        format_bytes(task.total_size)
    );
    println!(
        "  Copies: {}{}",
        task.backup_count,
        if task.sensitive {
            style(" (sensitive)").magenta().to_string()
        } else {
            String::new()
        }
    );
    println!("  Created: {}", local_time(task.created_at));
    if let Some(error) = &task.last_error {
        println!("  Error: {}", style(error).red());
    }
}

/// Display one line per task
pub fn print_tasks(tasks: &[BackupTask]) {
    if tasks.is_empty() {
        println!("{} No tasks", style("ℹ").yellow());
        return;
    }
    for task in tasks {
        println!(
            "{}  {:<17} {:>6.1}%  {}",
            task.id,
            task_status(task.status),
            task.progress_percent(),
            task.source_path.display()
        );
    }
}

/// Display task progress
pub fn print_progress(progress: &TaskProgress) {
    println!(
        "{} {:.1}% ({} of {}) {}",
        style(progress.task_id).bold(),
        progress.percent,
        format_bytes(progress.completed_size),
        format_bytes(progress.total_size),
        task_status(progress.status)
    );
}

/// Display copy logs
pub fn print_logs(logs: &[BackupLog]) {
    if logs.is_empty() {
        println!("{} No matching copies", style("ℹ").yellow());
        return;
    }
    for log in logs {
        println!(
            "{:<11} {} copy {} on {} -> {} ({})",
            log_status(log.status),
            style(&log.filename).cyan(),
            log.copy_index,
            log.disk_id,
            log.target_path.display(),
            format_bytes(log.size)
        );
    }
}

/// Display disks
pub fn print_disks(disks: &[HardDisk]) {
    if disks.is_empty() {
        println!("{} No disks", style("ℹ").yellow());
        return;
    }
    for disk in disks {
        let status = match disk.status {
            DiskStatus::Active => style(disk.status).green(),
            DiskStatus::Archived => style(disk.status).dim(),
            DiskStatus::Error => style(disk.status).red(),
        };
        let location = disk
            .mount_point
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| disk.remote_url.clone())
            .unwrap_or_default();
        let migration = disk
            .migration_status
            .map(|m| format!(" migration {:?}", m))
            .unwrap_or_default();
        println!(
            "{} {:<8} {:<5} {} free of {}  {}  [{}]{}",
            style(&disk.disk_id).bold(),
            status,
            disk.protocol,
            format_bytes(disk.available_capacity),
            format_bytes(disk.total_capacity),
            location,
            disk.serial_number,
            style(migration).yellow()
        );
    }
}

/// Display a classification
pub fn print_classification(report: &ClassificationReport) {
    println!();
    println!(
        "{}",
        style(format!("Classification of {}", report.path.display()))
            .bold()
            .underlined()
    );
    println!("  Sensitive: {}", report.sensitive);
    println!("  Cold: {}", report.cold);
    println!("  Copies: {}", report.copy_count);
    println!(
        "  Files needing backup: {} of {}",
        report.file_count, report.scanned_files
    );
    println!("  Planned bytes: {}", format_bytes(report.planned_bytes));
    if let Some(task_id) = report.auto_backup_task {
        println!(
            "  {} Cold data backup started as task {}",
            style("→").green().bold(),
            task_id
        );
    }
    if let Some(note) = &report.auto_backup_note {
        println!("  {} {}", style("ℹ").yellow(), note);
    }
}

/// Display a migration outcome
pub fn print_migration(report: &MigrationReport) {
    println!(
        "{} Migrated {} -> {}: {} files, {}, {} logs repointed",
        style("✓").green(),
        report.source_disk_id,
        report.target_disk_id,
        report.files_copied,
        format_bytes(report.bytes_copied),
        report.logs_relocated
    );
    for skipped in &report.skipped {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            skipped.path.display(),
            skipped.reason
        );
    }
}

/// Display policy values
pub fn print_config_values(values: &BTreeMap<String, String>) {
    for (key, value) in values {
        println!("{} = {}", style(key).cyan(), value);
    }
}
