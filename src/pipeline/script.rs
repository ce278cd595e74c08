//! Standalone `PowerShell` export.
//!
//! The generated script carries the whole pipeline spec inline, so it can be
//! copied to another machine and scheduled without the spec library. It
//! writes the spec to a temp file, calls `brisket run`, and passes the exit
//! code through:
//!
//! | Code | Meaning |
//! |---|---|
//! | 0 | success |
//! | 2 | validation failed |
//! | 3 | a step failed |
//! | 4 | cancelled |
//! | 5 | dataset busy |

use super::spec::PipelineSpec;
use crate::error::Result;
use std::path::Path;

/// Render a self-contained script that runs `spec` and writes to `output_path`.
///
/// # Errors
///
/// Fails only if the spec cannot be serialized.
pub fn to_standalone_script(spec: &PipelineSpec, output_path: &Path) -> Result<String> {
    let spec_json = spec.to_json()?;
    let pipeline_name = single_line(&spec.name);
    let description = spec
        .description
        .as_deref()
        .map_or_else(|| "Runs a brisket pipeline.".to_owned(), single_line);

    let step_list = if spec.is_noop() {
        "    (no steps, input is copied through)\n".to_owned()
    } else {
        spec.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| format!("    {}. {}\n", idx + 1, single_line(&step.describe())))
            .collect::<String>()
    };

    Ok(format!(
        r#"<#
.SYNOPSIS
    Automated data processing pipeline: {pipeline_name}

.DESCRIPTION
    {description}

    Steps:
{step_list}
.PARAMETER InputPath
    Path to the input data file to process

.PARAMETER OutputPath
    Where the processed output is written (default: {output_default_doc})

.PARAMETER Date
    Date string for {{date}} substitution (default: today, YYYY-MM-DD)

.PARAMETER FailOnWarnings
    Exit with an error if the run produced warnings

.NOTES
    Pipeline: {pipeline_name}
    Spec Version: {spec_version}
    Generated: {timestamp}
#>

param(
    [Parameter(Mandatory=$true)]
    [string]$InputPath,

    [Parameter(Mandatory=$false)]
    [string]$OutputPath = {output_default},

    [Parameter(Mandatory=$false)]
    [string]$Date,

    [Parameter(Mandatory=$false)]
    [switch]$FailOnWarnings
)

$ErrorActionPreference = "Stop"

$SpecJson = @'
{spec_json}
'@

if (-not (Test-Path $InputPath)) {{
    Write-Host "[ERROR] Input file not found: $InputPath" -ForegroundColor Red
    exit 1
}}

$SpecPath = Join-Path ([System.IO.Path]::GetTempPath()) ("brisket_" + [guid]::NewGuid().ToString() + ".json")
Set-Content -Path $SpecPath -Value $SpecJson -Encoding UTF8

$brisketArgs = @("run", "--spec", $SpecPath, "--input", $InputPath, "--output", $OutputPath)
if ($Date) {{
    $brisketArgs += "--date", $Date
}}
if ($FailOnWarnings) {{
    $brisketArgs += "--fail-on-warnings"
}}

Write-Host ('[INFO] Starting pipeline: ' + {pipeline_literal}) -ForegroundColor Cyan

try {{
    & brisket @brisketArgs
    $exitCode = $LASTEXITCODE
}} catch {{
    Write-Host "[ERROR] Failed to start brisket: $_" -ForegroundColor Red
    $exitCode = 1
}} finally {{
    Remove-Item -Path $SpecPath -ErrorAction SilentlyContinue
}}

switch ($exitCode) {{
    0 {{ Write-Host "[SUCCESS] Pipeline completed" -ForegroundColor Green }}
    2 {{ Write-Host "[ERROR] Pipeline validation failed: check the input schema" -ForegroundColor Red }}
    3 {{ Write-Host "[ERROR] Pipeline execution failed" -ForegroundColor Red }}
    4 {{ Write-Host "[WARNING] Pipeline was cancelled" -ForegroundColor Yellow }}
    5 {{ Write-Host "[WARNING] Dataset is busy, retry later" -ForegroundColor Yellow }}
    default {{ Write-Host "[ERROR] Pipeline failed with exit code $exitCode" -ForegroundColor Red }}
}}

exit $exitCode
"#,
        pipeline_literal = ps_single_quoted(&pipeline_name),
        spec_version = spec.version,
        output_default = ps_single_quoted(&output_path.display().to_string()),
        output_default_doc = single_line(&output_path.display().to_string()),
        timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
    ))
}

/// Standalone script followed by Task Scheduler setup notes.
pub fn to_scheduled_script(
    spec: &PipelineSpec,
    output_path: &Path,
    input_path: &Path,
) -> Result<String> {
    let base = to_standalone_script(spec, output_path)?;

    Ok(format!(
        r#"{base}
<#
SCHEDULING WITH WINDOWS TASK SCHEDULER:

1. Open Task Scheduler (taskschd.msc) and create a new task named
   "brisket - {name}".

2. Trigger: daily at the desired time.

3. Action: start a program
   - Program/script: powershell.exe
   - Arguments: -ExecutionPolicy Bypass -File "PATH\TO\THIS\SCRIPT.ps1" -InputPath "{input}"

4. Settings: allow the task to run on demand. Exit code 5 means another run
   held the dataset, so a retry after a few minutes is safe.
#>
"#,
        name = single_line(&spec.name),
        input = single_line(&input_path.display().to_string()),
    ))
}

/// Quote a value as a `PowerShell` single-quoted literal.
fn ps_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Collapse newlines so user text cannot break out of the comment block.
fn single_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .replace("#>", "# >")
}
