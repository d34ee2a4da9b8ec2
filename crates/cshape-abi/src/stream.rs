//! `FILE*` streams and temporary names.
//!
//! Streams are `file-stream` handles whose address is the native `FILE*`.
//! Every operation checks the handle is live before the pointer reaches the
//! C library; `fclose` releases the handle first, so closing twice is refused
//! instead of handing a dangling `FILE*` to the runtime.

use std::ffi::{CStr, CString, c_char, c_int, c_long};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cshape_membrane::{Handle, ResourceClass};
use thiserror::Error;

use crate::binding::Binding;
use crate::error::BindError;
use crate::marshal::c_text;
use crate::metrics::{AbiMetrics, abi_metrics, refused};

const TEMP: ResourceClass = ResourceClass::TempName;

fn native_call() {
    AbiMetrics::inc(&abi_metrics().native_calls);
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// `fopen` mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    Read,
    Write,
    Append,
    ReadUpdate,
    WriteUpdate,
    AppendUpdate,
    ReadBinary,
    WriteBinary,
    AppendBinary,
    ReadUpdateBinary,
    WriteUpdateBinary,
    AppendUpdateBinary,
}

impl FileMode {
    #[must_use]
    pub const fn as_cstr(self) -> &'static CStr {
        match self {
            Self::Read => c"r",
            Self::Write => c"w",
            Self::Append => c"a",
            Self::ReadUpdate => c"r+",
            Self::WriteUpdate => c"w+",
            Self::AppendUpdate => c"a+",
            Self::ReadBinary => c"rb",
            Self::WriteBinary => c"wb",
            Self::AppendBinary => c"ab",
            Self::ReadUpdateBinary => c"r+b",
            Self::WriteUpdateBinary => c"w+b",
            Self::AppendUpdateBinary => c"a+b",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        // Mode literals are ASCII.
        self.as_cstr().to_str().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` is not a stream mode")]
pub struct ParseFileModeError(String);

impl FromStr for FileMode {
    type Err = ParseFileModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "r" => Self::Read,
            "w" => Self::Write,
            "a" => Self::Append,
            "r+" => Self::ReadUpdate,
            "w+" => Self::WriteUpdate,
            "a+" => Self::AppendUpdate,
            "rb" => Self::ReadBinary,
            "wb" => Self::WriteBinary,
            "ab" => Self::AppendBinary,
            "r+b" | "rb+" => Self::ReadUpdateBinary,
            "w+b" | "wb+" => Self::WriteUpdateBinary,
            "a+b" | "ab+" => Self::AppendUpdateBinary,
            other => return Err(ParseFileModeError(other.to_string())),
        })
    }
}

/// `fseek` origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SeekOrigin {
    Set = libc::SEEK_SET,
    Cur = libc::SEEK_CUR,
    End = libc::SEEK_END,
}

fn c_path(path: &Path) -> Result<CString, BindError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|e| {
        refused(BindError::EmbeddedNulInText {
            position: e.nul_position(),
        })
    })
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

impl Binding<'_> {
    /// Tracked `FILE*` behind a live stream `function` is about to use.
    fn file(&self, function: &'static str, stream: Handle) -> Result<*mut libc::FILE, BindError> {
        let record = self.check_for(function, stream)?;
        Ok(record.handle.addr as *mut libc::FILE)
    }

    fn adopt_stream(
        &self,
        function: &'static str,
        file: *mut libc::FILE,
    ) -> Result<Handle, BindError> {
        self.acquire(function, file as usize, None).inspect_err(|_| {
            // SAFETY: `file` was just opened and is not tracked.
            unsafe { libc::fclose(file) };
        })
    }

    pub fn fopen(&self, path: impl AsRef<Path>, mode: FileMode) -> Result<Handle, BindError> {
        let path = c_path(path.as_ref())?;
        native_call();
        // SAFETY: both strings are NUL-terminated and outlive the call.
        let file = unsafe { libc::fopen(path.as_ptr(), mode.as_cstr().as_ptr()) };
        if file.is_null() {
            return Err(BindError::native("fopen"));
        }
        self.adopt_stream("fopen", file)
    }

    /// Anonymous stream removed automatically when closed.
    pub fn tmpfile(&self) -> Result<Handle, BindError> {
        native_call();
        // SAFETY: no arguments.
        let file = unsafe { libc::tmpfile() };
        if file.is_null() {
            return Err(BindError::native("tmpfile"));
        }
        self.adopt_stream("tmpfile", file)
    }

    pub fn fclose(&self, stream: Handle) -> Result<(), BindError> {
        let record = self.release_for("fclose", stream)?;
        native_call();
        // SAFETY: the handle was live until the release above.
        if unsafe { libc::fclose(record.handle.addr as *mut libc::FILE) } != 0 {
            return Err(BindError::native("fclose"));
        }
        Ok(())
    }

    pub fn fflush(&self, stream: Handle) -> Result<(), BindError> {
        let file = self.file("fflush", stream)?;
        native_call();
        // SAFETY: `file` is live.
        if unsafe { libc::fflush(file) } != 0 {
            return Err(BindError::native("fflush"));
        }
        Ok(())
    }

    pub fn fputs(&self, text: &str, stream: Handle) -> Result<(), BindError> {
        let file = self.file("fputs", stream)?;
        let text = c_text(text).map_err(refused)?;
        native_call();
        // SAFETY: `file` is live and `text` is NUL-terminated.
        if unsafe { libc::fputs(text.as_ptr(), file) } == libc::EOF {
            return Err(BindError::native("fputs"));
        }
        Ok(())
    }

    pub fn fputc(&self, byte: u8, stream: Handle) -> Result<(), BindError> {
        let file = self.file("fputc", stream)?;
        native_call();
        // SAFETY: `file` is live.
        if unsafe { libc::fputc(c_int::from(byte), file) } == libc::EOF {
            return Err(BindError::native("fputc"));
        }
        Ok(())
    }

    /// Next byte, or `None` at end of file or on error.
    pub fn fgetc(&self, stream: Handle) -> Result<Option<u8>, BindError> {
        let file = self.file("fgetc", stream)?;
        native_call();
        // SAFETY: `file` is live.
        let c = unsafe { libc::fgetc(file) };
        Ok(u8::try_from(c).ok())
    }

    /// Read one line into `buf` (newline kept, NUL-terminated). Returns the
    /// line length, or `None` when nothing was read.
    pub fn fgets(&self, buf: &mut [u8], stream: Handle) -> Result<Option<usize>, BindError> {
        let file = self.file("fgets", stream)?;
        if buf.is_empty() {
            return Err(refused(BindError::OutputBufferTooSmall {
                needed: 1,
                available: 0,
            }));
        }
        let cap = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        native_call();
        // SAFETY: `buf` is writable for at least `cap` bytes; `file` is live.
        let line = unsafe { libc::fgets(buf.as_mut_ptr().cast::<c_char>(), cap, file) };
        if line.is_null() {
            return Ok(None);
        }
        Ok(buf.iter().position(|&b| b == 0))
    }

    /// Read up to `buf.len()` bytes. Returns the count read.
    pub fn fread(&self, buf: &mut [u8], stream: Handle) -> Result<usize, BindError> {
        let file = self.file("fread", stream)?;
        native_call();
        // SAFETY: `buf` is writable for its length; `file` is live.
        Ok(unsafe { libc::fread(buf.as_mut_ptr().cast(), 1, buf.len(), file) })
    }

    /// Write `bytes`. Returns the count written.
    pub fn fwrite(&self, bytes: &[u8], stream: Handle) -> Result<usize, BindError> {
        let file = self.file("fwrite", stream)?;
        native_call();
        // SAFETY: `bytes` is readable for its length; `file` is live.
        Ok(unsafe { libc::fwrite(bytes.as_ptr().cast(), 1, bytes.len(), file) })
    }

    pub fn fseek(&self, stream: Handle, offset: i64, origin: SeekOrigin) -> Result<(), BindError> {
        let file = self.file("fseek", stream)?;
        native_call();
        // SAFETY: `file` is live.
        if unsafe { libc::fseek(file, offset as c_long, origin as c_int) } != 0 {
            return Err(BindError::native("fseek"));
        }
        Ok(())
    }

    pub fn ftell(&self, stream: Handle) -> Result<u64, BindError> {
        let file = self.file("ftell", stream)?;
        native_call();
        // SAFETY: `file` is live.
        let pos = unsafe { libc::ftell(file) };
        u64::try_from(pos).map_err(|_| BindError::native("ftell"))
    }

    pub fn rewind(&self, stream: Handle) -> Result<(), BindError> {
        let file = self.file("rewind", stream)?;
        native_call();
        // SAFETY: `file` is live.
        unsafe { libc::rewind(file) };
        Ok(())
    }

    pub fn feof(&self, stream: Handle) -> Result<bool, BindError> {
        let file = self.file("feof", stream)?;
        // SAFETY: `file` is live.
        Ok(unsafe { libc::feof(file) } != 0)
    }

    pub fn ferror(&self, stream: Handle) -> Result<bool, BindError> {
        let file = self.file("ferror", stream)?;
        // SAFETY: `file` is live.
        Ok(unsafe { libc::ferror(file) } != 0)
    }

    pub fn clearerr(&self, stream: Handle) -> Result<(), BindError> {
        let file = self.file("clearerr", stream)?;
        // SAFETY: `file` is live.
        unsafe { libc::clearerr(file) };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Temporary names
// ---------------------------------------------------------------------------

impl Binding<'_> {
    /// Reserve a fresh temporary file name.
    ///
    /// The file is created empty with `mkstemp`, so the name cannot be raced;
    /// the handle owns the name and [`Binding::remove_temp`] deletes both.
    pub fn tmpnam(&self) -> Result<Handle, BindError> {
        let mut template = std::env::temp_dir().into_os_string().into_vec();
        template.extend_from_slice(b"/cshape-XXXXXX");
        let template = CString::new(template).map_err(|e| {
            refused(BindError::EmbeddedNulInText {
                position: e.nul_position(),
            })
        })?;
        let raw = template.into_raw();
        native_call();
        // SAFETY: `raw` is a writable NUL-terminated template ending in XXXXXX.
        let fd = unsafe { libc::mkstemp(raw) };
        if fd < 0 {
            let err = BindError::native("mkstemp");
            // SAFETY: `raw` came from `CString::into_raw` above.
            drop(unsafe { CString::from_raw(raw) });
            return Err(err);
        }
        // SAFETY: `fd` was just opened by mkstemp.
        unsafe { libc::close(fd) };
        self.acquire("tmpnam", raw as usize, None).inspect_err(|_| {
            // SAFETY: the name is untracked; undo both the file and the string.
            unsafe {
                libc::remove(raw);
                drop(CString::from_raw(raw));
            }
        })
    }

    /// Path held by a live temporary name.
    pub fn temp_path(&self, name: Handle) -> Result<PathBuf, BindError> {
        let record = self.check_live_as(name, TEMP)?;
        // SAFETY: a live temp-name handle's tracked address is the
        // NUL-terminated string leaked by `tmpnam`.
        let bytes = unsafe { CStr::from_ptr(record.handle.addr as *const c_char) }.to_bytes();
        Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }

    /// Delete the file behind a temporary name and release the name.
    pub fn remove_temp(&self, name: Handle) -> Result<(), BindError> {
        let record = self.release_as(name, TEMP)?;
        // SAFETY: the handle was live until the release above, so the string
        // from `CString::into_raw` has not been reclaimed yet.
        let path = unsafe { CString::from_raw(record.handle.addr as *mut c_char) };
        native_call();
        // SAFETY: `path` is NUL-terminated.
        if unsafe { libc::remove(path.as_ptr()) } != 0 {
            return Err(BindError::native("remove"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_both_update_spellings() {
        assert_eq!("rb+".parse::<FileMode>().unwrap(), FileMode::ReadUpdateBinary);
        assert_eq!("r+b".parse::<FileMode>().unwrap(), FileMode::ReadUpdateBinary);
        assert_eq!("a".parse::<FileMode>().unwrap().as_str(), "a");
        assert!("rw".parse::<FileMode>().is_err());
    }

    #[test]
    fn every_mode_round_trips_through_its_text() {
        use FileMode::*;
        for mode in [
            Read,
            Write,
            Append,
            ReadUpdate,
            WriteUpdate,
            AppendUpdate,
            ReadBinary,
            WriteBinary,
            AppendBinary,
            ReadUpdateBinary,
            WriteUpdateBinary,
            AppendUpdateBinary,
        ] {
            assert_eq!(mode.as_str().parse::<FileMode>().unwrap(), mode);
        }
    }

    #[test]
    fn seek_origins_match_libc() {
        assert_eq!(SeekOrigin::Set as c_int, libc::SEEK_SET);
        assert_eq!(SeekOrigin::End as c_int, libc::SEEK_END);
    }

    #[test]
    fn paths_with_nul_are_refused() {
        let err = c_path(Path::new("a\0b")).unwrap_err();
        assert!(matches!(err, BindError::EmbeddedNulInText { position: 1 }));
    }
}
