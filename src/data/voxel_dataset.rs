/// Voxel grid dataset loader (NumPy `.npz` / `.npy`, MATLAB `.mat`)
use candle_core::{Device, Result, Tensor};
use matfile::{MatFile, NumericData};
use ndarray::{Array2, ArrayD, ArrayView1, IxDyn, OwnedRepr, ShapeBuilder};
use ndarray_npy::{NpzReader, ReadNpyExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::models::{GRID_SIZE, VOXELS};
use crate::VolAEError;

/// Seed used for shuffling unless overridden
pub const DEFAULT_SEED: u64 = 1234;

fn data_error(msg: impl Into<String>) -> VolAEError {
    VolAEError::DataLoad(msg.into())
}

/// In-memory voxel dataset, one flattened grid per row
pub struct VoxelDataset {
    voxels: Array2<f32>, // [N, 27000]
    source: Option<PathBuf>,
}

impl VoxelDataset {
    /// Load voxel grids stored under `label_key`
    ///
    /// * `.npz` archive: the array named `label_key` (`.npy` suffix optional)
    /// * directory: `<dir>/<label_key>.npy`
    /// * `.npy` file: the stored array, `label_key` is not consulted
    /// * `.mat` file (MATLAB level 5): the variable named `label_key`
    ///
    /// Elements may be f32, f64, u8 or bool (any numeric class for `.mat`). Accepted shapes are
    /// `[N, 30, 30, 30]`, `[N, 1, 30, 30, 30]` and `[N, 27000]`.
    pub fn load<P: AsRef<Path>>(path: P, label_key: &str) -> crate::Result<Self> {
        let path = path.as_ref();

        log::info!("Loading voxel dataset from: {:?} (key '{}')", path, label_key);

        if !path.exists() {
            return Err(data_error(format!("{} does not exist", path.display())));
        }

        let array = if path.is_dir() {
            let file = path.join(format!("{}.npy", label_key));
            if !file.exists() {
                return Err(data_error(format!(
                    "label key '{}' not found: {} does not exist",
                    label_key,
                    file.display()
                )));
            }
            read_npy_file(&file)?
        } else if path.extension().map_or(false, |ext| ext == "npy") {
            read_npy_file(path)?
        } else if path.extension().map_or(false, |ext| ext == "mat") {
            read_mat_entry(path, label_key)?
        } else {
            read_npz_entry(path, label_key)?
        };

        log::info!("Loaded array: shape {:?}", array.shape());

        let mut dataset = Self::from_array(array)?;
        dataset.source = Some(path.to_path_buf());
        Ok(dataset)
    }

    /// Build from an in-memory array, validating the grid shape
    pub fn from_array(array: ArrayD<f32>) -> crate::Result<Self> {
        let shape = array.shape().to_vec();
        let grid = |dims: &[usize]| dims.iter().all(|&d| d == GRID_SIZE);

        let valid = match shape.as_slice() {
            [_, flat] => *flat == VOXELS,
            [_, rest @ ..] if rest.len() == 3 => grid(rest),
            [_, 1, rest @ ..] if rest.len() == 3 => grid(rest),
            _ => false,
        };
        if !valid {
            return Err(data_error(format!(
                "expected samples of shape [N, {g}, {g}, {g}], [N, 1, {g}, {g}, {g}] or [N, {v}], got {:?}",
                shape,
                g = GRID_SIZE,
                v = VOXELS
            )));
        }

        let num_samples = shape[0];
        if num_samples == 0 {
            return Err(data_error("dataset contains no samples"));
        }

        let voxels = Array2::from_shape_vec((num_samples, VOXELS), array.iter().copied().collect())
            .map_err(|e| data_error(e.to_string()))?;

        Ok(Self {
            voxels,
            source: None,
        })
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.voxels.nrows()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.voxels.nrows() == 0
    }

    /// Flattened grid at index
    pub fn sample(&self, idx: usize) -> ArrayView1<f32> {
        self.voxels.row(idx)
    }

    /// File the dataset was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Load a dataset and report its size, `(samples, count)`
pub fn load_data<P: AsRef<Path>>(path: P, label_key: &str) -> crate::Result<(VoxelDataset, usize)> {
    let dataset = VoxelDataset::load(path, label_key)?;
    let count = dataset.len();
    Ok((dataset, count))
}

fn read_npy_file(path: &Path) -> crate::Result<ArrayD<f32>> {
    let open = || -> crate::Result<BufReader<File>> { Ok(BufReader::new(File::open(path)?)) };

    let f32_err = match ArrayD::<f32>::read_npy(open()?) {
        Ok(array) => return Ok(array),
        Err(e) => e,
    };
    if let Ok(array) = ArrayD::<f64>::read_npy(open()?) {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Ok(array) = ArrayD::<u8>::read_npy(open()?) {
        return Ok(array.mapv(f32::from));
    }
    if let Ok(array) = ArrayD::<bool>::read_npy(open()?) {
        return Ok(array.mapv(|v| if v { 1.0 } else { 0.0 }));
    }

    Err(data_error(format!(
        "failed to read {} (expected f32, f64, u8 or bool elements): {}",
        path.display(),
        f32_err
    )))
}

/// Array `label_key` of a MATLAB level 5 file, converted from column-major
fn read_mat_entry(path: &Path, label_key: &str) -> crate::Result<ArrayD<f32>> {
    let reader = BufReader::new(File::open(path)?);
    let mat = MatFile::parse(reader).map_err(|e| {
        data_error(format!(
            "failed to read {} as a MAT v5 file: {:?}",
            path.display(),
            e
        ))
    })?;

    let array = mat.find_by_name(label_key).ok_or_else(|| {
        let names: Vec<&str> = mat.arrays().iter().map(|a| a.name()).collect();
        data_error(format!(
            "label key '{}' not found in {} (available: {:?})",
            label_key,
            path.display(),
            names
        ))
    })?;

    let values: Vec<f32> = match array.data() {
        NumericData::Double { real, .. } => real.iter().map(|&v| v as f32).collect(),
        NumericData::Single { real, .. } => real.clone(),
        NumericData::UInt8 { real, .. } => real.iter().map(|&v| f32::from(v)).collect(),
        NumericData::Int8 { real, .. } => real.iter().map(|&v| f32::from(v)).collect(),
        NumericData::UInt16 { real, .. } => real.iter().map(|&v| f32::from(v)).collect(),
        NumericData::Int16 { real, .. } => real.iter().map(|&v| f32::from(v)).collect(),
        NumericData::UInt32 { real, .. } => real.iter().map(|&v| v as f32).collect(),
        NumericData::Int32 { real, .. } => real.iter().map(|&v| v as f32).collect(),
        NumericData::UInt64 { real, .. } => real.iter().map(|&v| v as f32).collect(),
        NumericData::Int64 { real, .. } => real.iter().map(|&v| v as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(data_error(format!(
                "'{}' in {} is not a numeric array",
                label_key,
                path.display()
            )))
        }
    };

    ArrayD::from_shape_vec(IxDyn(array.size()).f(), values).map_err(|e| {
        data_error(format!(
            "'{}' in {} has inconsistent size {:?}: {}",
            label_key,
            path.display(),
            array.size(),
            e
        ))
    })
}

fn read_npz_entry(path: &Path, label_key: &str) -> crate::Result<ArrayD<f32>> {
    let file = File::open(path)?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| data_error(format!("failed to open {} as .npz: {}", path.display(), e)))?;

    let names = npz
        .names()
        .map_err(|e| data_error(format!("failed to list {}: {}", path.display(), e)))?;
    let with_suffix = format!("{}.npy", label_key);
    let name = names
        .iter()
        .find(|n| n.as_str() == label_key || *n == &with_suffix)
        .cloned()
        .ok_or_else(|| {
            data_error(format!(
                "label key '{}' not found in {} (available: {:?})",
                label_key,
                path.display(),
                names
            ))
        })?;

    let f32_err = match npz.by_name::<OwnedRepr<f32>, IxDyn>(&name) {
        Ok(array) => return Ok(array),
        Err(e) => e,
    };
    if let Ok(array) = npz.by_name::<OwnedRepr<f64>, IxDyn>(&name) {
        return Ok(array.mapv(|v| v as f32));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<u8>, IxDyn>(&name) {
        return Ok(array.mapv(f32::from));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<bool>, IxDyn>(&name) {
        return Ok(array.mapv(|v| if v { 1.0 } else { 0.0 }));
    }

    Err(data_error(format!(
        "failed to read '{}' from {} (expected f32, f64, u8 or bool elements): {}",
        name,
        path.display(),
        f32_err
    )))
}

/// One training batch
///
/// `inputs` is `[b, 1, 30, 30, 30]`, `targets` is the same data as `[b, 27000]`.
/// `b` equals the configured batch size except for the tail batch, which holds
/// exactly the remaining samples (no padding).
#[derive(Debug, Clone)]
pub struct VoxelBatch {
    pub inputs: Tensor,
    pub targets: Tensor,
    /// Dataset indices of the samples, in batch order
    pub indices: Vec<usize>,
}

impl VoxelBatch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Data loader for voxel datasets
pub struct VoxelDataLoader {
    dataset: VoxelDataset,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
    rng: StdRng,
}

impl VoxelDataLoader {
    /// Create new data loader
    pub fn new(dataset: VoxelDataset, batch_size: usize, shuffle: bool) -> crate::Result<Self> {
        Self::with_seed(dataset, batch_size, shuffle, DEFAULT_SEED)
    }

    /// Create new data loader with an explicit shuffling seed
    pub fn with_seed(
        dataset: VoxelDataset,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(VolAEError::Config("batch_size must be >= 1".to_string()));
        }

        let indices: Vec<usize> = (0..dataset.len()).collect();
        let mut loader = Self {
            dataset,
            batch_size,
            current_idx: 0,
            indices,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        };
        loader.reset();
        Ok(loader)
    }

    /// Get next batch, allocated on `device`
    pub fn next_batch(&mut self, device: &Device) -> Result<Option<VoxelBatch>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = self.indices[self.current_idx..end_idx].to_vec();
        let actual_batch_size = batch_indices.len();

        let mut data = Vec::with_capacity(actual_batch_size * VOXELS);
        for &idx in &batch_indices {
            data.extend(self.dataset.sample(idx).iter().copied());
        }

        self.current_idx = end_idx;

        let inputs = Tensor::from_vec(
            data,
            (actual_batch_size, 1, GRID_SIZE, GRID_SIZE, GRID_SIZE),
            device,
        )?;
        let targets = inputs.reshape((actual_batch_size, VOXELS))?;

        Ok(Some(VoxelBatch {
            inputs,
            targets,
            indices: batch_indices,
        }))
    }

    /// Reset loader for new epoch
    pub fn reset(&mut self) {
        self.current_idx = 0;

        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    /// Get number of batches
    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get dataset reference
    pub fn dataset(&self) -> &VoxelDataset {
        &self.dataset
    }
}

impl super::BatchDataLoader for VoxelDataLoader {
    fn next_batch(&mut self, device: &Device) -> Result<Option<VoxelBatch>> {
        VoxelDataLoader::next_batch(self, device)
    }

    fn reset(&mut self) {
        VoxelDataLoader::reset(self)
    }

    fn num_batches(&self) -> usize {
        VoxelDataLoader::num_batches(self)
    }

    fn num_samples(&self) -> usize {
        self.dataset.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array4};
    use ndarray_npy::{NpzWriter, WriteNpyExt};

    /// Sample `i` is filled with the value `i`
    fn indexed_grids(n: usize) -> Array4<f32> {
        Array4::from_shape_fn((n, GRID_SIZE, GRID_SIZE, GRID_SIZE), |(i, _, _, _)| i as f32)
    }

    fn write_npz(path: &Path, key: &str, array: &Array4<f32>) {
        let mut npz = NpzWriter::new(File::create(path).unwrap());
        npz.add_array(key, array).unwrap();
        npz.finish().unwrap();
    }

    /// Minimal uncompressed MAT v5 file holding one double matrix
    fn write_mat(path: &Path, name: &str, dims: &[usize], column_major: &[f64]) {
        fn element(out: &mut Vec<u8>, data_type: u32, payload: &[u8]) {
            out.extend_from_slice(&data_type.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
            out.resize((out.len() + 7) / 8 * 8, 0);
        }

        let mut matrix = Vec::new();
        // miUINT32 array flags, class mxDOUBLE_CLASS
        let flags: Vec<u8> = [6u32, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        element(&mut matrix, 6, &flags);
        // miINT32 dimensions
        let dims: Vec<u8> = dims.iter().flat_map(|&d| (d as i32).to_le_bytes()).collect();
        element(&mut matrix, 5, &dims);
        // miINT8 name
        element(&mut matrix, 1, name.as_bytes());
        // miDOUBLE real part
        let data: Vec<u8> = column_major.iter().flat_map(|v| v.to_le_bytes()).collect();
        element(&mut matrix, 9, &data);

        let mut file = b"MATLAB 5.0 MAT-file, Platform: GLNXA64".to_vec();
        file.resize(116, b' ');
        file.extend_from_slice(&[0u8; 8]);
        file.extend_from_slice(&0x0100u16.to_le_bytes());
        file.extend_from_slice(b"IM");
        // miMATRIX
        element(&mut file, 14, &matrix);

        std::fs::write(path, file).unwrap();
    }

    fn drain_sizes(loader: &mut VoxelDataLoader) -> Result<Vec<usize>> {
        let mut sizes = Vec::new();
        while let Some(batch) = loader.next_batch(&Device::Cpu)? {
            sizes.push(batch.len());
        }
        Ok(sizes)
    }

    #[test]
    fn test_load_npz_by_key() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train_data.npz");
        write_npz(&path, "labels", &indexed_grids(4));

        let (dataset, count) = load_data(&path, "labels")?;
        assert_eq!(count, 4);
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.sample(2)[0], 2.0);
        assert_eq!(dataset.source(), Some(path.as_path()));
        Ok(())
    }

    #[test]
    fn test_missing_label_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_data.npz");
        write_npz(&path, "voxels", &indexed_grids(2));

        let result = load_data(&path, "labels");
        assert!(matches!(result, Err(VolAEError::DataLoad(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_data("does/not/exist.npz", "labels");
        assert!(matches!(result, Err(VolAEError::DataLoad(_))));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_data.npz");
        std::fs::write(&path, b"definitely not a zip archive").unwrap();

        assert!(matches!(load_data(&path, "labels"), Err(VolAEError::DataLoad(_))));
    }

    #[test]
    fn test_load_mat_by_key() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train_data.mat");
        // row-major value i * VOXELS + j, stored column-major
        let column_major: Vec<f64> = (0..2 * VOXELS)
            .map(|k| ((k % 2) * VOXELS + k / 2) as f64)
            .collect();
        write_mat(&path, "labels", &[2, VOXELS], &column_major);

        let (dataset, count) = load_data(&path, "labels")?;
        assert_eq!(count, 2);
        assert_eq!(dataset.sample(0)[5], 5.0);
        assert_eq!(dataset.sample(1)[0], VOXELS as f32);
        assert_eq!(dataset.sample(1)[5], (VOXELS + 5) as f32);
        Ok(())
    }

    #[test]
    fn test_mat_missing_label_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_data.mat");
        write_mat(&path, "voxels", &[1, VOXELS], &vec![0.0; VOXELS]);

        assert!(matches!(load_data(&path, "labels"), Err(VolAEError::DataLoad(_))));
    }

    #[test]
    fn test_mat_garbage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_data.mat");
        std::fs::write(&path, b"not a MAT-file").unwrap();

        assert!(matches!(load_data(&path, "labels"), Err(VolAEError::DataLoad(_))));
    }

    #[test]
    fn test_load_directory_layout() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let flat = Array::from_shape_fn((3, VOXELS), |(i, _)| i as f64).into_dyn();
        flat.write_npy(File::create(dir.path().join("labels.npy"))?).unwrap();

        let (dataset, count) = load_data(dir.path(), "labels")?;
        assert_eq!(count, 3);
        assert_eq!(dataset.sample(1)[VOXELS - 1], 1.0);
        Ok(())
    }

    #[test]
    fn test_load_u8_npy() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("grids.npy");
        let grids = Array::from_shape_fn((2, 1, GRID_SIZE, GRID_SIZE, GRID_SIZE), |(i, ..)| i as u8);
        grids.write_npy(File::create(&path)?).unwrap();

        let (dataset, count) = load_data(&path, "ignored")?;
        assert_eq!(count, 2);
        assert_eq!(dataset.sample(1)[0], 1.0);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_grid_shape() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[2, 10, 10, 10]));
        assert!(matches!(VoxelDataset::from_array(array), Err(VolAEError::DataLoad(_))));
    }

    #[test]
    fn test_rejects_empty_dataset() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[0, VOXELS]));
        assert!(VoxelDataset::from_array(array).is_err());
    }

    #[test]
    fn test_tail_batch_partition() -> crate::Result<()> {
        let dataset = VoxelDataset::from_array(indexed_grids(7).into_dyn())?;
        let mut loader = VoxelDataLoader::new(dataset, 3, false)?;

        assert_eq!(loader.num_batches(), 3);
        assert_eq!(drain_sizes(&mut loader)?, vec![3, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_every_sample_visited_once() -> crate::Result<()> {
        let dataset = VoxelDataset::from_array(indexed_grids(11).into_dyn())?;
        let mut loader = VoxelDataLoader::with_seed(dataset, 4, true, 7)?;

        for _epoch in 0..2 {
            loader.reset();
            let mut seen = Vec::new();
            while let Some(batch) = loader.next_batch(&Device::Cpu)? {
                seen.extend(batch.indices);
            }
            seen.sort_unstable();
            assert_eq!(seen, (0..11).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[test]
    fn test_batch_contents() -> crate::Result<()> {
        let dataset = VoxelDataset::from_array(indexed_grids(5).into_dyn())?;
        let mut loader = VoxelDataLoader::new(dataset, 2, false)?;

        let batch = loader.next_batch(&Device::Cpu)?.unwrap();
        assert_eq!(batch.inputs.dims(), &[2, 1, GRID_SIZE, GRID_SIZE, GRID_SIZE]);
        assert_eq!(batch.targets.dims(), &[2, VOXELS]);
        assert_eq!(batch.indices, vec![0, 1]);

        let targets = batch.targets.to_vec2::<f32>()?;
        assert!(targets[0].iter().all(|&v| v == 0.0));
        assert!(targets[1].iter().all(|&v| v == 1.0));

        let flattened = batch.inputs.flatten_from(1)?.to_vec2::<f32>()?;
        assert_eq!(flattened, targets);
        Ok(())
    }

    #[test]
    fn test_reset_restarts_epoch() -> crate::Result<()> {
        let dataset = VoxelDataset::from_array(indexed_grids(3).into_dyn())?;
        let mut loader = VoxelDataLoader::new(dataset, 2, false)?;

        assert_eq!(drain_sizes(&mut loader)?, vec![2, 1]);
        assert!(loader.next_batch(&Device::Cpu)?.is_none());

        loader.reset();
        assert_eq!(drain_sizes(&mut loader)?, vec![2, 1]);
        Ok(())
    }

    #[test]
    fn test_zero_batch_size_rejected() -> crate::Result<()> {
        let dataset = VoxelDataset::from_array(indexed_grids(1).into_dyn())?;
        assert!(matches!(
            VoxelDataLoader::new(dataset, 0, false),
            Err(VolAEError::Config(_))
        ));
        Ok(())
    }
}
