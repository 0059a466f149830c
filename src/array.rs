//! Fixed-stride arrays that live either on the heap or in a memory-mapped
//! file. The graph stores only ever talk to these through logical
//! `get`/`set`/`resize`, never through raw memory.

use std::{
    fs::{File, OpenOptions},
    io, mem,
    path::{Path, PathBuf},
};

use bytemuck::Pod;
use memmap2::{MmapMut, MmapOptions};

pub struct HugeArray<T: Pod> {
    backing: Backing<T>,
}

enum Backing<T> {
    Memory(Vec<T>),
    Mapped(MappedArray),
}

struct MappedArray {
    path: PathBuf,
    file: File,
    // None while the array is empty, zero-length mappings are not portable.
    map: Option<MmapMut>,
    len: usize,
}

impl MappedArray {
    fn remap<T: Pod>(&mut self, len: usize) -> io::Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }

        let bytes = len * mem::size_of::<T>();
        self.file.set_len(bytes as u64)?;
        self.map = if bytes == 0 {
            None
        } else {
            // The file is owned by this array and never resized behind the mapping.
            Some(unsafe { MmapOptions::new().len(bytes).map_mut(&self.file)? })
        };
        self.len = len;

        Ok(())
    }
}

impl<T: Pod> HugeArray<T> {
    pub fn new(len: usize) -> Self {
        Self {
            backing: Backing::Memory(vec![T::zeroed(); len]),
        }
    }

    /// Creates (or truncates) `path` and maps `len` zeroed elements from it.
    pub fn mapped(path: impl AsRef<Path>, len: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut mapped = MappedArray {
            path,
            file,
            map: None,
            len: 0,
        };
        mapped.remap::<T>(len)?;

        Ok(Self {
            backing: Backing::Mapped(mapped),
        })
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Mapped(mapped) => Some(&mapped.path),
        }
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Memory(values) => values.len(),
            Backing::Mapped(mapped) => mapped.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> T {
        self.as_slice()[idx]
    }

    pub fn set(&mut self, idx: usize, value: T) {
        self.as_mut_slice()[idx] = value;
    }

    /// Grows with zeroed elements or truncates.
    pub fn resize(&mut self, len: usize) -> io::Result<()> {
        match &mut self.backing {
            Backing::Memory(values) => {
                values.resize(len, T::zeroed());
                if len < values.capacity() / 2 {
                    values.shrink_to_fit();
                }
                Ok(())
            }
            Backing::Mapped(mapped) => mapped.remap::<T>(len),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.backing {
            Backing::Memory(values) => values,
            Backing::Mapped(mapped) => match &mapped.map {
                Some(map) => bytemuck::cast_slice(&map[..]),
                None => &[],
            },
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.backing {
            Backing::Memory(values) => values,
            Backing::Mapped(mapped) => match &mut mapped.map {
                Some(map) => bytemuck::cast_slice_mut(&mut map[..]),
                None => &mut [],
            },
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        match &self.backing {
            Backing::Memory(_) => Ok(()),
            Backing::Mapped(mapped) => match &mapped.map {
                Some(map) => map.flush(),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::Zeroable;

    use super::*;

    #[repr(C)]
    #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
    struct Pair {
        a: u32,
        b: f32,
    }

    #[test]
    fn test_memory_resize_keeps_values() {
        let mut array = HugeArray::<u32>::new(4);
        array.set(3, 7);
        array.resize(10).unwrap();

        assert_eq!(array.len(), 10);
        assert_eq!(array.get(3), 7);
        assert_eq!(array.get(9), 0);

        array.resize(2).unwrap();
        assert_eq!(array.as_slice(), &[0, 0]);
    }

    #[test]
    fn test_mapped_resize_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut array = HugeArray::<Pair>::mapped(dir.path().join("pairs.bin"), 0).unwrap();
        assert!(array.is_empty());
        assert!(array.is_mapped());

        array.resize(3).unwrap();
        array.set(1, Pair { a: 5, b: 1.5 });
        array.resize(1024).unwrap();

        assert_eq!(array.get(1), Pair { a: 5, b: 1.5 });
        assert_eq!(array.get(1023), Pair { a: 0, b: 0.0 });

        array.flush().unwrap();
        let on_disk = std::fs::metadata(array.path().unwrap()).unwrap().len();
        assert_eq!(on_disk, 1024 * mem::size_of::<Pair>() as u64);
    }
}
