//! End-to-end scenarios for the reference interpreter.

use cellatom::{parse, run_one_step};

/// Parse `source` and run it for `steps` steps over `grid`, double-buffering
/// like the CLI driver does.
fn run(source: &str, mut grid: Vec<i16>, width: i16, height: i16, steps: u32) -> Vec<i16> {
    let program = parse(source).unwrap();
    let mut next = vec![0; grid.len()];
    for _ in 0..steps {
        run_one_step(&grid, &mut next, width, height, &program);
        std::mem::swap(&mut grid, &mut next);
    }
    grid
}

#[test]
fn identity() {
    let grid = vec![5, -3, 0, 1, 32767, -32768, 9, 2, 4];
    assert_eq!(run("= v v", grid.clone(), 3, 3, 1), grid);
}

#[test]
fn constant_fill() {
    let grid = vec![5, -3, 0, 1, 7, -9, 9, 2, 4];
    assert_eq!(run("= v 7", grid, 3, 3, 1), vec![7; 9]);
}

const LIFE: &str = "= a1 0\n\
                    neighbours ( + a1 a0 )\n\
                    = v [ a1 | (3,3) => 1, (2,2) => v, (0,8) => 0, ]\n";

/// A glider as live `(x, y)` cells.
const GLIDER: &[(usize, usize)] = &[(0, 1), (1, 2), (2, 0), (2, 1), (2, 2)];

fn place(cells: &[(usize, usize)], shift: usize, size: usize) -> Vec<i16> {
    let mut grid = vec![0; size * size];
    for &(x, y) in cells {
        grid[(x + shift) * size + (y + shift)] = 1;
    }
    grid
}

#[test]
fn life_glider_translates_diagonally() {
    // Four generations move the glider one cell down-right.
    let start = place(GLIDER, 0, 10);
    let expected = place(GLIDER, 1, 10);
    assert_eq!(run(LIFE, start, 10, 10, 4), expected);
}

#[test]
fn sum_of_neighbours() {
    let source = "= a1 0 neighbours ( + a1 a0 ) = v a1";
    let grid = vec![0, 1, 0, 1, 1, 1, 0, 1, 0];
    // Every corner has three live in-grid neighbours, every edge three, the
    // centre four.
    assert_eq!(
        run(source, grid, 3, 3, 1),
        vec![3, 3, 3, 3, 4, 3, 3, 3, 3]
    );
}

#[test]
fn range_map_classification() {
    let source = "= v [ v | (0,0) => 10, (1,5) => 20, (6,100) => 30, ]";
    assert_eq!(
        run(source, vec![0, 1, 5, 6, 100], 1, 5, 1),
        vec![10, 20, 20, 30, 30]
    );
}

#[test]
fn range_map_first_match_wins() {
    let source = "= v [ v | (0,9) => 1, (5,9) => 2, ]";
    assert_eq!(run(source, vec![7], 1, 1, 1), vec![1]);
}

#[test]
fn global_register_carry_pins_visitation_order() {
    let source = "+ g0 1 = v g0";
    assert_eq!(run(source, vec![0; 4], 2, 2, 1), vec![1, 2, 3, 4]);
}

#[test]
fn globals_reset_between_steps() {
    // A second step starts from zeroed globals, so the result is unchanged.
    let source = "+ g0 1 = v g0";
    assert_eq!(run(source, vec![0; 4], 2, 2, 2), vec![1, 2, 3, 4]);
}

#[test]
fn locals_reset_between_cells() {
    // If a1 leaked across cells the later cells would count upwards.
    let source = "+ a1 1 = v a1";
    assert_eq!(run(source, vec![9; 6], 2, 3, 1), vec![1; 6]);
}

#[test]
fn neighbour_visit_counts() {
    // Counting visits classifies corner, edge and interior cells.
    let source = "= a1 0 neighbours ( + a1 1 ) = v a1";
    assert_eq!(
        run(source, vec![0; 9], 3, 3, 1),
        vec![3, 5, 3, 5, 8, 5, 3, 5, 3]
    );
}

#[test]
fn neighbour_accumulation_keeps_locals() {
    // max of the neighbourhood: a1 carries across neighbour visits.
    let source = "= a1 0 neighbours ( max a1 a0 ) = v a1";
    let grid = vec![4, 9, 2, 1, 0, 3, 8, 5, 6];
    assert_eq!(
        run(source, grid, 3, 3, 1),
        vec![9, 4, 9, 9, 9, 9, 5, 8, 5]
    );
}

#[test]
fn min_and_max_operators() {
    assert_eq!(run("min v 3", vec![-5, 3, 9], 1, 3, 1), vec![-5, 3, 3]);
    assert_eq!(run("max v 3", vec![-5, 3, 9], 1, 3, 1), vec![3, 3, 9]);
}

#[test]
fn division_truncates_toward_zero() {
    assert_eq!(
        run("/ v 2", vec![7, -7, 1, -1], 2, 2, 1),
        vec![3, -3, 0, 0]
    );
}

#[test]
fn non_square_grids() {
    // 2 wide, 4 high: the linearisation walks y fastest.
    let source = "= a1 0 neighbours ( + a1 1 ) = v a1";
    assert_eq!(
        run(source, vec![0; 8], 2, 4, 1),
        vec![3, 5, 5, 3, 3, 5, 5, 3]
    );
}
