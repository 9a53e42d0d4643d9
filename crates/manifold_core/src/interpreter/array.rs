use std::cell::RefCell;
use std::rc::Rc;

use manifold_common::data::types::ScalarType;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Converts to the representation of `type_`, wrapping integers to the type's width.
    pub fn cast(self, type_: ScalarType) -> Scalar {
        match type_ {
            ScalarType::Bool => Scalar::Bool(self.truthy()),
            ScalarType::UInt8 => Scalar::Int(self.as_i64() as u8 as i64),
            ScalarType::Int8 => Scalar::Int(self.as_i64() as i8 as i64),
            ScalarType::Int16 => Scalar::Int(self.as_i64() as i16 as i64),
            ScalarType::Int32 => Scalar::Int(self.as_i64() as i32 as i64),
            ScalarType::Int64 => Scalar::Int(self.as_i64()),
            ScalarType::Float32 => Scalar::Float(self.as_f64() as f32 as f64),
            ScalarType::Float64 => Scalar::Float(self.as_f64()),
        }
    }

    pub fn natural_type(self) -> ScalarType {
        match self {
            Scalar::Bool(_) => ScalarType::Bool,
            Scalar::Int(_) => ScalarType::Int64,
            Scalar::Float(_) => ScalarType::Float64,
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Scalar::Bool(value) => value,
            Scalar::Int(value) => value != 0,
            Scalar::Float(value) => value != 0.0,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Bool(value) => value as i64,
            Scalar::Int(value) => value,
            Scalar::Float(value) => value as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(value) => value as i64 as f64,
            Scalar::Int(value) => value as f64,
            Scalar::Float(value) => value,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArrayError {
    #[error("index {index} is out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("too many indices: array has rank {rank} but {found} indices were given")]
    TooManyIndices { rank: usize, found: usize },
    #[error("slice step cannot be zero")]
    ZeroStep,
    #[error("cannot assign array of shape {found:?} into slot of shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("array literal elements have differing shapes {first:?} and {other:?}")]
    Ragged { first: Vec<usize>, other: Vec<usize> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceValue {
    /// Resolves the slice against an axis of length `len` with Python's clamping rules, returning
    /// the first position, the number of selected positions, and the step.
    pub fn resolve(&self, len: usize) -> Result<(i64, usize, i64), ArrayError> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ArrayError::ZeroStep);
        }

        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |value: i64| {
            if value < 0 {
                (value + len).max(lower)
            } else {
                value.min(upper)
            }
        };

        let start = match self.start {
            Some(start) => clamp(start),
            None if step < 0 => upper,
            None => lower,
        };
        let stop = match self.stop {
            Some(stop) => clamp(stop),
            None if step < 0 => lower,
            None => upper,
        };

        let count = if step > 0 && stop > start {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };

        Ok((start, count as usize, step))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexItem {
    Int(i64),
    Slice(SliceValue),
}

/// Iterates over every multi-index of a shape in row-major order.
#[derive(Clone, Debug)]
pub struct Indices {
    shape: Vec<usize>,
    next: Option<Vec<usize>>,
}

pub fn indices(shape: &[usize]) -> Indices {
    let empty = shape.iter().any(|&dim| dim == 0);
    Indices {
        shape: shape.to_vec(),
        next: if empty {
            None
        } else {
            Some(vec![0; shape.len()])
        },
    }
}

impl Iterator for Indices {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut following = current.clone();
        for axis in (0..self.shape.len()).rev() {
            following[axis] += 1;
            if following[axis] < self.shape[axis] {
                self.next = Some(following);
                break;
            }
            following[axis] = 0;
        }
        Some(current)
    }
}

/// The shape produced by broadcasting `shapes` against each other, aligning trailing dimensions.
pub fn broadcast_shapes<'a>(shapes: impl IntoIterator<Item = &'a [usize]>) -> Option<Vec<usize>> {
    let mut result: Vec<usize> = Vec::new();
    for shape in shapes {
        if shape.len() > result.len() {
            let mut widened = vec![1; shape.len() - result.len()];
            widened.extend(&result);
            result = widened;
        }
        let skip = result.len() - shape.len();
        for (res_dim, &dim) in result[skip..].iter_mut().zip(shape) {
            if *res_dim == 1 {
                *res_dim = dim;
            } else if dim != 1 && dim != *res_dim {
                return None;
            }
        }
    }
    Some(result)
}

/// A strided view over shared, mutable element storage.
///
/// Cloning an `ArrayValue` aliases the same storage. Elements are always stored in the
/// representation of `elt`.
#[derive(Clone, Debug)]
pub struct ArrayValue {
    elt: ScalarType,
    data: Rc<RefCell<Vec<Scalar>>>,
    shape: Vec<usize>,
    strides: Vec<isize>,
    offset: isize,
}

fn contiguous_strides(shape: &[usize]) -> Vec<isize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1isize;
    for axis in (0..shape.len()).rev() {
        strides[axis] = stride;
        stride *= shape[axis] as isize;
    }
    strides
}

impl ArrayValue {
    pub fn from_flat(elt: ScalarType, shape: Vec<usize>, data: Vec<Scalar>) -> ArrayValue {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        let data = data.into_iter().map(|value| value.cast(elt)).collect();
        ArrayValue {
            elt,
            data: Rc::new(RefCell::new(data)),
            strides: contiguous_strides(&shape),
            shape,
            offset: 0,
        }
    }

    pub fn zeros(elt: ScalarType, shape: Vec<usize>) -> ArrayValue {
        let size = shape.iter().product();
        ArrayValue::from_flat(elt, shape, vec![Scalar::Int(0); size])
    }

    pub fn elt(&self) -> ScalarType {
        self.elt
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn same_storage(&self, other: &ArrayValue) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    fn position(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.rank());
        let pos = self.offset
            + index
                .iter()
                .zip(&self.strides)
                .map(|(&i, &stride)| i as isize * stride)
                .sum::<isize>();
        pos as usize
    }

    pub fn get(&self, index: &[usize]) -> Scalar {
        self.data.borrow()[self.position(index)]
    }

    pub fn set(&self, index: &[usize], value: Scalar) {
        let pos = self.position(index);
        self.data.borrow_mut()[pos] = value.cast(self.elt);
    }

    /// Reads the element that broadcasting maps output position `index` onto.
    pub fn get_broadcast(&self, index: &[usize]) -> Scalar {
        let skip = index.len() - self.rank();
        let own: Vec<usize> = index[skip..]
            .iter()
            .zip(&self.shape)
            .map(|(&i, &dim)| if dim == 1 { 0 } else { i })
            .collect();
        self.get(&own)
    }

    pub fn to_flat(&self) -> Vec<Scalar> {
        indices(&self.shape).map(|index| self.get(&index)).collect()
    }

    /// A view of position `i` along `axis`, with that axis removed.
    pub fn index_axis(&self, axis: usize, i: usize) -> ArrayValue {
        let mut view = self.clone();
        view.offset += i as isize * self.strides[axis];
        view.shape.remove(axis);
        view.strides.remove(axis);
        view
    }

    fn slice_axis(&self, axis: usize, start: i64, count: usize, step: i64) -> ArrayValue {
        let mut view = self.clone();
        if count > 0 {
            view.offset += start as isize * self.strides[axis];
        }
        view.shape[axis] = count;
        view.strides[axis] *= step as isize;
        view
    }

    /// Applies index items to successive leading axes. The result may have rank 0.
    pub fn select(&self, items: &[IndexItem]) -> Result<ArrayValue, ArrayError> {
        if items.len() > self.rank() {
            return Err(ArrayError::TooManyIndices {
                rank: self.rank(),
                found: items.len(),
            });
        }

        let mut view = self.clone();
        let mut axis = 0;
        for item in items {
            let len = view.shape[axis];
            match item {
                IndexItem::Int(index) => {
                    let resolved = if *index < 0 {
                        *index + len as i64
                    } else {
                        *index
                    };
                    if resolved < 0 || resolved >= len as i64 {
                        return Err(ArrayError::IndexOutOfBounds { index: *index, len });
                    }
                    view = view.index_axis(axis, resolved as usize);
                }
                IndexItem::Slice(slice) => {
                    let (start, count, step) = slice.resolve(len)?;
                    view = view.slice_axis(axis, start, count, step);
                    axis += 1;
                }
            }
        }
        Ok(view)
    }

    pub fn fill(&self, value: Scalar) {
        for index in indices(&self.shape) {
            self.set(&index, value);
        }
    }

    /// Copies `src` into this view, broadcasting it if it has fewer or unit dimensions.
    pub fn copy_from(&self, src: &ArrayValue) -> Result<(), ArrayError> {
        let mismatch = || ArrayError::ShapeMismatch {
            expected: self.shape.clone(),
            found: src.shape.clone(),
        };
        if src.rank() > self.rank() {
            return Err(mismatch());
        }
        match broadcast_shapes([self.shape(), src.shape()]) {
            Some(shape) if shape == self.shape => {}
            _ => return Err(mismatch()),
        }

        // Read everything first, since `src` may overlap this view.
        let values: Vec<(Vec<usize>, Scalar)> = indices(&self.shape)
            .map(|index| {
                let value = src.get_broadcast(&index);
                (index, value)
            })
            .collect();
        for (index, value) in values {
            self.set(&index, value);
        }
        Ok(())
    }

    pub fn cast(&self, elt: ScalarType) -> ArrayValue {
        ArrayValue::from_flat(elt, self.shape.clone(), self.to_flat())
    }

    /// Stacks equally-shaped arrays along a new leading axis.
    pub fn stack(elt: ScalarType, items: &[ArrayValue]) -> Result<ArrayValue, ArrayError> {
        let inner_shape = match items.first() {
            Some(first) => first.shape.clone(),
            None => Vec::new(),
        };
        let mut data = Vec::new();
        for item in items {
            if item.shape != inner_shape {
                return Err(ArrayError::Ragged {
                    first: inner_shape,
                    other: item.shape.clone(),
                });
            }
            data.extend(item.to_flat());
        }
        let mut shape = vec![items.len()];
        shape.extend(inner_shape);
        Ok(ArrayValue::from_flat(elt, shape, data))
    }
}

impl PartialEq for ArrayValue {
    fn eq(&self, other: &ArrayValue) -> bool {
        self.shape == other.shape && self.to_flat() == other.to_flat()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn iota(shape: Vec<usize>) -> ArrayValue {
        let size = shape.iter().product::<usize>() as i64;
        ArrayValue::from_flat(
            ScalarType::Int64,
            shape,
            (0..size).map(Scalar::Int).collect(),
        )
    }

    #[test]
    fn test_slice_resolve() {
        let full = SliceValue {
            start: None,
            stop: None,
            step: None,
        };
        assert_eq!(full.resolve(5), Ok((0, 5, 1)));

        let reversed = SliceValue {
            start: None,
            stop: None,
            step: Some(-1),
        };
        assert_eq!(reversed.resolve(5), Ok((4, 5, -1)));

        let stepped = SliceValue {
            start: Some(1),
            stop: Some(-1),
            step: Some(2),
        };
        assert_eq!(stepped.resolve(6), Ok((1, 2, 2)));

        let empty = SliceValue {
            start: Some(4),
            stop: Some(2),
            step: None,
        };
        assert_eq!(empty.resolve(6), Ok((4, 0, 1)));

        let zero = SliceValue {
            start: None,
            stop: None,
            step: Some(0),
        };
        assert_eq!(zero.resolve(3), Err(ArrayError::ZeroStep));
    }

    #[test]
    fn test_views_write_through() {
        let array = iota(vec![3, 4]);
        let row = array
            .select(&[IndexItem::Int(1)])
            .expect("row 1 exists");
        assert_eq!(row.shape(), &[4]);
        row.fill(Scalar::Int(-1));
        assert_eq!(array.get(&[1, 2]), Scalar::Int(-1));
        assert_eq!(array.get(&[2, 0]), Scalar::Int(8));

        let column = array
            .select(&[
                IndexItem::Slice(SliceValue {
                    start: None,
                    stop: None,
                    step: Some(-1),
                }),
                IndexItem::Int(0),
            ])
            .expect("column 0 exists");
        assert_eq!(
            column.to_flat(),
            vec![Scalar::Int(8), Scalar::Int(-1), Scalar::Int(0)]
        );
    }

    #[test]
    fn test_index_errors() {
        let array = iota(vec![2, 2]);
        assert_eq!(
            array.select(&[IndexItem::Int(2)]).err(),
            Some(ArrayError::IndexOutOfBounds { index: 2, len: 2 })
        );
        assert_eq!(
            array
                .select(&[IndexItem::Int(0), IndexItem::Int(0), IndexItem::Int(0)])
                .err(),
            Some(ArrayError::TooManyIndices { rank: 2, found: 3 })
        );
        assert_eq!(
            array.select(&[IndexItem::Int(-1), IndexItem::Int(-2)]).map(|v| v.get(&[])),
            Ok(Scalar::Int(2))
        );
    }

    #[test]
    fn test_copy_from_broadcasts() {
        let dest = ArrayValue::zeros(ScalarType::Float64, vec![2, 3]);
        let row = ArrayValue::from_flat(
            ScalarType::Int64,
            vec![3],
            vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)],
        );
        dest.copy_from(&row).expect("row broadcasts over rows");
        assert_eq!(dest.get(&[1, 2]), Scalar::Float(3.0));

        let wrong = ArrayValue::zeros(ScalarType::Int64, vec![2]);
        assert!(dest.copy_from(&wrong).is_err());
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(
            broadcast_shapes([&[3usize, 1][..], &[4][..]]),
            Some(vec![3, 4])
        );
        assert_eq!(broadcast_shapes([&[3usize][..], &[4][..]]), None);
        assert_eq!(broadcast_shapes([&[][..], &[2usize, 2][..]]), Some(vec![2, 2]));
    }

    #[test]
    fn test_cast_wraps() {
        assert_eq!(Scalar::Int(300).cast(ScalarType::UInt8), Scalar::Int(44));
        assert_eq!(Scalar::Int(-1).cast(ScalarType::UInt8), Scalar::Int(255));
        assert_eq!(Scalar::Float(2.7).cast(ScalarType::Int32), Scalar::Int(2));
        assert_eq!(Scalar::Int(0).cast(ScalarType::Bool), Scalar::Bool(false));
    }
}
