use std::io;
use std::path::PathBuf;

/// Directory holding the running executable.
pub fn get_running_path() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent().map(|p| p.to_path_buf()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("executable {} has no parent directory", exe.display()),
        )
    })
}
