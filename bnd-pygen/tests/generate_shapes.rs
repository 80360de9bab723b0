//! End-to-end test: shapes.toml → module source, checked piece by piece.

use std::path::Path;
use std::sync::LazyLock;

static SHAPES: LazyLock<bnd_pygen::Generated> = LazyLock::new(|| {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../tests/fixtures/shapes.toml");
    bnd_pygen::generate(&path).expect("generate shapes module")
});

fn text() -> &'static str {
    &SHAPES.text
}

fn position(needle: &str) -> usize {
    text()
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` missing from generated module"))
}

#[test]
fn shapes_generates_without_warnings() {
    assert!(SHAPES.warnings.is_empty(), "{:?}", SHAPES.warnings);
    assert!(text().contains("#include \"shapes.h\"\n"));
    assert!(text().contains("#include <map>\n"));
    assert!(text().contains("PyInit_shapes(void)\n{"));
}

#[test]
fn shapes_function_table() {
    let table = &text()[position("static PyMethodDef shapes_functions[] = {")..];
    let table = &table[..table.find("};").unwrap()];
    for entry in [
        "{(char *) \"distance\", (PyCFunction) _wrap_distance, METH_VARARGS|METH_KEYWORDS, NULL },",
        "{(char *) \"scale\", (PyCFunction) _wrap_scale, METH_VARARGS|METH_KEYWORDS, NULL },",
        "{(char *) \"origin\", (PyCFunction) _wrap_origin, METH_NOARGS, NULL },",
    ] {
        assert!(table.contains(entry), "missing {entry} in {table}");
    }
}

#[test]
fn shapes_scale_overloads_try_every_candidate() {
    assert!(text().contains("retval = _wrap_scale__0(self, args, kwargs, &exceptions[0]);"));
    assert!(text().contains("retval = _wrap_scale__1(self, args, kwargs, &exceptions[1]);"));
    assert!(text().contains("retval = _wrap_custom_scale(self, args, kwargs, &exceptions[2]);"));
    assert!(text().contains("PyObject *exceptions[3] = {0,};"));
    // delegates and the custom body come before the entry point that calls them
    let custom = position("_wrap_custom_scale(PyObject *self, PyObject *args, PyObject *kwargs, PyObject **return_exception)\n{");
    let entry = position("_wrap_scale(PyObject *self, PyObject *args, PyObject *kwargs)\n{");
    assert!(custom < entry);
}

#[test]
fn shapes_point_constructors_are_aggregated() {
    assert!(text().contains("_wrap_PyGeoPoint__tp_init__0(PyGeoPoint *self, PyObject *args, PyObject *kwargs, PyObject **return_exception)"));
    assert!(text().contains("_wrap_PyGeoPoint__tp_init__1(PyGeoPoint *self, PyObject *args, PyObject *kwargs, PyObject **return_exception)"));
    assert!(text().contains("    (initproc)_wrap_PyGeoPoint__tp_init, /* tp_init */"));
    assert!(text().contains("{(char *) \"translated\", (PyCFunction) _wrap_PyGeoPoint_translated, METH_VARARGS|METH_KEYWORDS, NULL },"));
}

#[test]
fn shapes_shape_is_subclassable() {
    let helper = position("class PyGeoShape__PythonHelper : public geo::Shape\n{");
    let init = position("_wrap_PyGeoShape__tp_init(PyGeoShape *self, PyObject *args, PyObject *kwargs)\n{");
    assert!(helper < init);
    assert!(text().contains("PyGeoShape__PythonHelper::area() const\n{"));
    assert!(text().contains("PyGeoShape__PythonHelper::name() const\n{"));
    assert!(text().contains("    Py_TPFLAGS_DEFAULT|Py_TPFLAGS_HAVE_GC|Py_TPFLAGS_BASETYPE, /* tp_flags */"));
    assert!(text().contains("    offsetof(PyGeoShape, inst_dict), /* tp_dictoffset */"));
    assert!(text().contains("if (Py_TYPE(self) != &PyGeoShape_Type)"));
}

#[test]
fn shapes_module_init_registers_everything() {
    let init = &text()[position("PyInit_shapes(void)")..];
    let point = init.find("PyType_Ready(&PyGeoPoint_Type)").unwrap();
    let shape = init.find("PyType_Ready(&PyGeoShape_Type)").unwrap();
    assert!(point < shape, "classes register in declaration order");
    for value in ["RED", "GREEN", "BLUE"] {
        let constant = format!("PyModule_AddIntConstant(m, (char *) \"{value}\", geo::{value}) < 0");
        assert!(init.contains(&constant), "missing {constant}");
    }
    assert!(init.trim_end().ends_with("return m;\n}"));
}
