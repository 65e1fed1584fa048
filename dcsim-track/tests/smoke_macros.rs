// Copyright (c) 2020 Graphcore Ltd. All rights reserved.

//! Ensure that all version of each macro can be used

use std::rc::Rc;

use dcsim_track::entity::{Entity, toplevel};
use dcsim_track::{
    Id, create, create_id, debug, destroy, enter, error, exit, info, set_time, test_helpers,
    test_init, trace, value, warn,
};

macro_rules! build_with_entity {
    ($name:ident, $macro:ident, $slvl:expr) => (
        #[test]
        fn $name() {
            let (test_tracker, tracker) = test_init!(100);

            let top = toplevel(&tracker, "top");
            test_helpers::check_and_clear(&test_tracker, &["0: created 100, top, 0 bytes"]);
            assert_eq!(top.id, Id(100));

            $macro!(top ; "Loc with no args");
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl, ": Loc with no args")]);

            $macro!(top ; "Loc with {} argument", 1);
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl, ": Loc with 1 argument")]);

            $macro!(top ; "Loc with {}, {} arguments", 1, 1 + 1);
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl,": Loc with 1, 2 arguments")]);

            drop(top);
            test_helpers::check_and_clear(&test_tracker, &["0: destroyed 100"]);
        }
    );
}

build_with_entity!(trace_with_entity, trace, "TRACE");
build_with_entity!(info_with_entity, info, "INFO");
build_with_entity!(debug_with_entity, debug, "DEBUG");
build_with_entity!(warn_with_entity, warn, "WARN");
build_with_entity!(error_with_entity, error, "ERROR");

#[test]
fn create_destroy() {
    let (test_tracker, tracker) = test_init!(10);

    let top = toplevel(&tracker, "top");
    test_helpers::check_and_clear(&test_tracker, &["0: created 10, top, 0 bytes"]);

    let id = create_id!(top);
    assert_eq!(id, Id(11));
    create!(top ; id, 64);
    test_helpers::check_and_clear(&test_tracker, &["10: created 11, 11, 64 bytes"]);

    destroy!(top ; id);
    test_helpers::check_and_clear(&test_tracker, &["10: destroyed 11"]);

    drop(top);
    test_helpers::check_and_clear(&test_tracker, &["0: destroyed 10"]);
}

#[test]
fn child_entities() {
    let (test_tracker, tracker) = test_init!(20);

    let top = toplevel(&tracker, "top");
    let switch = Rc::new(Entity::new(&top, "switch0"));
    test_helpers::check_and_clear(
        &test_tracker,
        &[
            "0: created 20, top, 0 bytes",
            "20: created 21, top::switch0, 0 bytes",
        ],
    );

    drop(switch);
    test_helpers::check_and_clear(&test_tracker, &["20: destroyed 21"]);
}

#[test]
fn enter_exit_value_time() {
    let (test_tracker, tracker) = test_init!(40);

    let top = toplevel(&tracker, "top");
    let obj = create_id!(top);
    enter!(top ; obj);
    exit!(top ; obj);
    value!(top ; 1.5);
    set_time!(top ; 250);
    test_helpers::check_and_clear(
        &test_tracker,
        &[
            "0: created 40, top, 0 bytes",
            "40: 41 entered",
            "40: 41 exited",
            "40: value 1.5",
            "40: set time 250ns",
        ],
    );
}
